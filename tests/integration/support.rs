//! Shared fixtures for integration tests
//!
//! A counter slice with a primary and a sensitive field, and a users slice
//! with a per-user databases slice mounted into the selected user.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use strata::patch::PatchValue;
use strata::store::{PersistSink, PersistedDataLoader};
use strata::{KeyPath, MountOptions, Patch, PersistError, Slice, SliceBuilder, Tree, Value};
use tokio::sync::Notify;

pub fn tree(value: serde_json::Value) -> Tree {
    Tree::from_json(value).unwrap()
}

fn int(state: &Tree, key: &str) -> i64 {
    state.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.as_map()?.get(key)?.as_str()
}

/// `{ value, sensitiveValue }`; `value` goes to the primary channel and
/// `sensitiveValue` to the sensitive one.
pub fn counter_slice(name: &str) -> Slice {
    SliceBuilder::new(name, tree(serde_json::json!({"value": 0, "sensitiveValue": 0})))
        .case("increment", |state, _| state.set("value", int(state, "value") + 1))
        .case("decrement", |state, _| state.set("value", int(state, "value") - 1))
        .case("incrementByAmount", |state, payload| {
            state.set("value", int(state, "value") + payload.as_i64().unwrap_or(0))
        })
        .case("sensitiveIncrement", |state, _| {
            state.set("sensitiveValue", int(state, "sensitiveValue") + 1)
        })
        .case("sensitiveDecrement", |state, _| {
            state.set("sensitiveValue", int(state, "sensitiveValue") - 1)
        })
        .selector("value", |state| state.get("value").cloned())
        .selector("sensitiveValue", |state| state.get("sensitiveValue").cloned())
        .persist_state(|diff| diff.pick(&["value"]))
        .persist_sensitive_state(|diff| diff.pick(&["sensitiveValue"]))
        .build()
}

fn database(url: &str, username: &str, password: &str) -> Tree {
    Tree::new()
        .set("url", url)
        .set("username", username)
        .set("password", password)
}

pub fn databases_initial_state() -> Tree {
    Tree::new()
        .set("currentDatabaseId", Value::Null)
        .set("databases", Tree::new())
}

pub fn databases_slice() -> Slice {
    SliceBuilder::new("databases", databases_initial_state())
        .case("addDatabase", |state, payload| {
            let Some(id) = field(payload, "id") else {
                return state.clone();
            };
            let path = KeyPath::new(["databases", id]);
            if state.get_in(&path).is_some() {
                return state.clone();
            }
            let db = database(
                field(payload, "url").unwrap_or(""),
                field(payload, "username").unwrap_or(""),
                field(payload, "password").unwrap_or(""),
            );
            state.set_in(&path, db)
        })
        .case("updateDatabase", |state, payload| {
            let Some(id) = field(payload, "id") else {
                return state.clone();
            };
            let path = KeyPath::new(["databases", id]);
            let Some(existing) = state.get_in(&path).and_then(Value::as_map) else {
                return state.clone();
            };
            let mut updated = existing.clone();
            for key in ["url", "username", "password"] {
                if let Some(value) = field(payload, key) {
                    updated = updated.set(key, value);
                }
            }
            state.set_in(&path, updated)
        })
        .case("removeDatabase", |state, payload| {
            let Some(id) = field(payload, "id") else {
                return state.clone();
            };
            let next = state.update_in(&KeyPath::new(["databases", id]), |_| None);
            if next.get("currentDatabaseId").and_then(Value::as_str) == Some(id) {
                next.set("currentDatabaseId", Value::Null)
            } else {
                next
            }
        })
        .selector_with_args("database", |state, args| {
            let id = args.as_str()?;
            state.get_in(&KeyPath::new(["databases", id])).cloned()
        })
        .persist_state(|diff| {
            let Some(databases) = diff.get_patch("databases") else {
                return Patch::new();
            };
            Patch::new().with(
                "databases",
                databases.map_entries(|_, db| {
                    db.as_patch()
                        .map(|db| PatchValue::Nested(db.pick(&["url", "username"])))
                }),
            )
        })
        .persist_sensitive_state(|diff| {
            let Some(databases) = diff.get_patch("databases") else {
                return Patch::new();
            };
            Patch::new().with(
                "databases",
                databases.map_entries(|_, db| {
                    db.as_patch().map(|db| PatchValue::Nested(db.pick(&["password"])))
                }),
            )
        })
        .restore_state(|persisted, original| {
            let Some(databases) = persisted.as_map().and_then(|data| data.get_tree("databases"))
            else {
                return original.clone();
            };
            let restored: Tree = databases
                .iter()
                .filter_map(|(id, data)| {
                    let data = data.as_map()?;
                    let text = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or("");
                    let url = text("url");
                    if url.is_empty() {
                        return None;
                    }
                    Some((id, database(url, text("username"), text("password"))))
                })
                .collect();
            original.set("databases", restored)
        })
        .build()
}

fn user(name: &str) -> Tree {
    Tree::new()
        .set("name", name)
        .set("databases", databases_initial_state())
}

fn users_leaf() -> Slice {
    SliceBuilder::new(
        "users",
        Tree::new()
            .set("currentUserId", Value::Null)
            .set("users", Tree::new()),
    )
    .case("addUser", |state, payload| {
        let Some(id) = field(payload, "id") else {
            return state.clone();
        };
        let path = KeyPath::new(["users", id]);
        if state.get_in(&path).is_some() {
            return state.clone();
        }
        state.set_in(&path, user(field(payload, "name").unwrap_or("Default User")))
    })
    .case("renameUser", |state, payload| {
        let (Some(id), Some(name)) = (field(payload, "id"), field(payload, "name")) else {
            return state.clone();
        };
        let path = KeyPath::new(["users", id, "name"]);
        if state.get_in(&KeyPath::new(["users", id])).is_none() {
            return state.clone();
        }
        state.set_in(&path, name)
    })
    .case("removeUser", |state, payload| {
        let Some(id) = field(payload, "id") else {
            return state.clone();
        };
        let next = state.update_in(&KeyPath::new(["users", id]), |_| None);
        if next.get("currentUserId").and_then(Value::as_str) == Some(id) {
            next.set("currentUserId", Value::Null)
        } else {
            next
        }
    })
    .case("setCurrentUser", |state, payload| {
        match field(payload, "id") {
            Some(id) if state.get_in(&KeyPath::new(["users", id])).is_some() => {
                state.set("currentUserId", id)
            }
            _ => state.clone(),
        }
    })
    .selector("currentUserId", |state| state.get("currentUserId").cloned())
    .persist_state(|diff| {
        let mut persisted = diff.pick(&["currentUserId"]);
        if let Some(users) = diff.get_patch("users") {
            persisted.insert(
                "users",
                users.map_entries(|_, user| {
                    user.as_patch().map(|user| PatchValue::Nested(user.pick(&["name"])))
                }),
            );
        }
        persisted
    })
    .restore_state(|persisted, original| {
        let Some(data) = persisted.as_map() else {
            return original.clone();
        };
        let current_user_id = match data.get("currentUserId") {
            Some(id @ Value::String(_)) => id.clone(),
            _ => original.get("currentUserId").cloned().unwrap_or_default(),
        };
        let users: Tree = match data.get_tree("users") {
            Some(users) => users
                .iter()
                .filter_map(|(id, data)| {
                    let data = data.as_map()?;
                    let name = data.get("name").and_then(Value::as_str).unwrap_or("Unnamed User");
                    Some((id, user(name)))
                })
                .collect(),
            None => original.get_tree("users").cloned().unwrap_or_default(),
        };
        original.set("currentUserId", current_user_id).set("users", users)
    })
    .build()
}

fn current_user_path(state: &Tree) -> Option<KeyPath> {
    let id = state.get("currentUserId")?.as_str()?;
    state.get_tree("users")?.get_tree(id)?;
    Some(KeyPath::new(["users", id, "databases"]))
}

/// Project a users-level diff through `project` for each user's databases.
fn per_user_databases(diff: &Patch, project: impl Fn(&Patch) -> Option<Patch>) -> Patch {
    let Some(users) = diff.get_patch("users") else {
        return Patch::new();
    };
    Patch::new().with(
        "users",
        users.map_entries(|_, user| {
            let databases = user.as_patch()?.get_patch("databases")?;
            Some(PatchValue::Nested(
                Patch::new().with("databases", project(&databases)?),
            ))
        }),
    )
}

/// Users with the databases slice mounted into the current user.
pub fn users_slice() -> Slice {
    let databases = databases_slice();
    let primary = databases.clone();
    let sensitive = databases.clone();
    let restorer = databases.clone();

    users_leaf()
        .mount(
            databases,
            |state| {
                let path = current_user_path(state)?;
                state.get_in(&path).and_then(Value::as_map).cloned()
            },
            |state, databases| match current_user_path(state) {
                Some(path) => state.set_in(&path, databases),
                None => state.clone(),
            },
            MountOptions::new()
                .optional_state()
                .persist_state(move |diff| {
                    per_user_databases(diff, |databases| primary.persist_state(databases))
                })
                .persist_sensitive_state(move |diff| {
                    per_user_databases(diff, |databases| sensitive.persist_sensitive_state(databases))
                })
                .restore_state(move |persisted, original| {
                    let Some(persisted_users) =
                        persisted.as_map().and_then(|data| data.get_tree("users"))
                    else {
                        return original.clone();
                    };
                    let Some(users) = original.get_tree("users") else {
                        return original.clone();
                    };
                    let restored: Tree = users
                        .iter()
                        .map(|(id, user)| {
                            let restored = match (user.as_map(), persisted_users.get_tree(id)) {
                                (Some(user), Some(data)) => {
                                    let data = data.get("databases").cloned().unwrap_or_default();
                                    let current = user.get_tree("databases").cloned().unwrap_or_default();
                                    let databases =
                                        restorer.restore_state(&data, &current).unwrap_or(current);
                                    Value::from(user.set("databases", databases))
                                }
                                _ => user.clone(),
                            };
                            (id, restored)
                        })
                        .collect();
                    original.set("users", restored)
                }),
        )
        .unwrap()
}

/// Sink that records every call.
#[derive(Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<(Tree, Tree)>>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(Tree, Tree)> {
        self.calls.lock().unwrap().clone()
    }

    /// Last `(snapshot, previous)` as JSON.
    pub fn last(&self) -> Option<(serde_json::Value, serde_json::Value)> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(snapshot, previous)| (snapshot.to_json(), previous.to_json()))
    }
}

impl PersistSink for RecordingSink {
    fn persist(&self, snapshot: &Tree, previous: &Tree) -> Result<(), PersistError> {
        self.calls
            .lock()
            .unwrap()
            .push((snapshot.clone(), previous.clone()));
        Ok(())
    }
}

/// Loader that waits for [`GatedLoader::open`] before returning its data.
#[derive(Clone)]
pub struct GatedLoader {
    gate: Arc<Notify>,
    data: Option<Value>,
}

impl GatedLoader {
    pub fn new(data: Option<serde_json::Value>) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            data: data.map(Value::from),
        }
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl PersistedDataLoader for GatedLoader {
    async fn load(&self) -> Result<Option<Value>, PersistError> {
        self.gate.notified().await;
        Ok(self.data.clone())
    }
}

/// Loader that always fails.
pub struct FailingLoader;

#[async_trait]
impl PersistedDataLoader for FailingLoader {
    async fn load(&self) -> Result<Option<Value>, PersistError> {
        Err(PersistError::Loader("storage unavailable".to_string()))
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a scoped subscriber and return what it logged at WARN.
pub fn capture_warnings(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let logged = buffer.0.lock().unwrap().clone();
    String::from_utf8(logged).unwrap()
}
