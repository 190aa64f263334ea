//! In-memory properties bus.
//!
//! Holds property maps per (path, interface), answers `GetAll`/`Get`/`Set`
//! from them, and fans out change batches to subscribers. Calls can be
//! scripted to fail or to never answer, which is how timeouts and remote
//! errors are exercised without a real bus.

use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::bus::{ChangeStream, PropertiesBus, PropertiesChanged};
use crate::error::{BusError, DBUS_ERROR_UNKNOWN_INTERFACE, DBUS_ERROR_UNKNOWN_PROPERTY};
use crate::value::{PropertyMap, Value};

/// Properties method selector for scripted replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusMethod {
    /// `GetAll`
    GetAll,
    /// `Get`
    Get,
    /// `Set`
    Set,
}

impl BusMethod {
    fn as_str(&self) -> &'static str {
        match self {
            BusMethod::GetAll => "GetAll",
            BusMethod::Get => "Get",
            BusMethod::Set => "Set",
        }
    }
}

/// A reply that overrides the stored objects.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Fail with this error.
    Fail(BusError),
    /// Never answer.
    Hang,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct BusCall {
    /// Method called
    pub method: BusMethod,
    /// Object path
    pub path: String,
    /// Interface argument
    pub interface: String,
    /// Property name (`Get` and `Set` only)
    pub property: Option<String>,
}

struct Subscriber {
    path: String,
    interface: String,
    tx: mpsc::UnboundedSender<PropertiesChanged>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<(String, String), PropertyMap>,
    scripted: HashMap<(BusMethod, String), ScriptedReply>,
    subscribers: Vec<Subscriber>,
    calls: Vec<BusCall>,
    sets: Vec<(String, String, String, Value)>,
    echo_sets: bool,
}

/// In-memory [`PropertiesBus`].
#[derive(Default)]
pub struct MockBus {
    state: RefCell<MockState>,
}

impl MockBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `interface` on `path` with the given properties.
    pub fn add_object(&self, path: &str, interface: &str, properties: PropertyMap) {
        self.state
            .borrow_mut()
            .objects
            .insert((path.to_string(), interface.to_string()), properties);
    }

    /// Removes `interface` from `path`.
    pub fn remove_object(&self, path: &str, interface: &str) {
        self.state
            .borrow_mut()
            .objects
            .remove(&(path.to_string(), interface.to_string()));
    }

    /// Returns the stored value of one property.
    pub fn property(&self, path: &str, interface: &str, name: &str) -> Option<Value> {
        self.state
            .borrow()
            .objects
            .get(&(path.to_string(), interface.to_string()))
            .and_then(|props| props.get(name).cloned())
    }

    /// Makes every `method` call on `interface` fail with `error`.
    pub fn fail(&self, method: BusMethod, interface: &str, error: BusError) {
        self.script(method, interface, ScriptedReply::Fail(error));
    }

    /// Makes every `method` call on `interface` hang.
    pub fn hang(&self, method: BusMethod, interface: &str) {
        self.script(method, interface, ScriptedReply::Hang);
    }

    /// Installs a scripted reply for `method` on `interface`.
    pub fn script(&self, method: BusMethod, interface: &str, reply: ScriptedReply) {
        self.state
            .borrow_mut()
            .scripted
            .insert((method, interface.to_string()), reply);
    }

    /// Removes every scripted reply.
    pub fn clear_script(&self) {
        self.state.borrow_mut().scripted.clear();
    }

    /// When enabled, a successful `Set` is emitted as a change event.
    pub fn set_echo(&self, enabled: bool) {
        self.state.borrow_mut().echo_sets = enabled;
    }

    /// Stores `changes` and delivers them to subscribers of
    /// (`path`, `interface`).
    pub fn emit_properties_changed(&self, path: &str, interface: &str, changes: PropertyMap) {
        self.store(path, interface, &changes);
        self.deliver(path, interface, PropertiesChanged::changed(changes));
    }

    /// Stores `values` but announces only their names, as invalidated
    /// properties.
    pub fn emit_invalidated(&self, path: &str, interface: &str, values: PropertyMap) {
        self.store(path, interface, &values);
        let mut invalidated: Vec<String> = values.into_keys().collect();
        invalidated.sort();
        self.deliver(
            path,
            interface,
            PropertiesChanged {
                changed: PropertyMap::new(),
                invalidated,
            },
        );
    }

    fn store(&self, path: &str, interface: &str, values: &PropertyMap) {
        self.state
            .borrow_mut()
            .objects
            .entry((path.to_string(), interface.to_string()))
            .or_default()
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn deliver(&self, path: &str, interface: &str, batch: PropertiesChanged) {
        let mut state = self.state.borrow_mut();
        state.subscribers.retain(|sub| !sub.tx.is_closed());
        let mut delivered = 0;
        for sub in &state.subscribers {
            if sub.path == path && sub.interface == interface && sub.tx.send(batch.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(path, interface, delivered, "emitted PropertiesChanged");
    }

    /// Returns the number of live subscriptions on (`path`, `interface`).
    pub fn subscriber_count(&self, path: &str, interface: &str) -> usize {
        self.state
            .borrow()
            .subscribers
            .iter()
            .filter(|sub| sub.path == path && sub.interface == interface && !sub.tx.is_closed())
            .count()
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<BusCall> {
        self.state.borrow().calls.clone()
    }

    /// Returns the number of `method` calls made so far.
    pub fn call_count(&self, method: BusMethod) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    /// Returns every `Set` received, as (path, interface, name, value).
    pub fn sets(&self) -> Vec<(String, String, String, Value)> {
        self.state.borrow().sets.clone()
    }

    fn record(
        &self,
        method: BusMethod,
        path: &str,
        interface: &str,
        property: Option<&str>,
    ) -> Option<ScriptedReply> {
        let mut state = self.state.borrow_mut();
        state.calls.push(BusCall {
            method,
            path: path.to_string(),
            interface: interface.to_string(),
            property: property.map(str::to_string),
        });
        state.scripted.get(&(method, interface.to_string())).cloned()
    }

    fn lookup(&self, path: &str, interface: &str) -> Result<PropertyMap, BusError> {
        self.state
            .borrow()
            .objects
            .get(&(path.to_string(), interface.to_string()))
            .cloned()
            .ok_or_else(|| {
                BusError::remote(
                    DBUS_ERROR_UNKNOWN_INTERFACE,
                    format!("No such interface '{}' on {}", interface, path),
                )
            })
    }
}

async fn scripted<T>(method: BusMethod, reply: ScriptedReply) -> Result<T, BusError> {
    match reply {
        ScriptedReply::Fail(err) => Err(err),
        ScriptedReply::Hang => {
            debug!(method = method.as_str(), "holding call without reply");
            std::future::pending().await
        }
    }
}

#[async_trait(?Send)]
impl PropertiesBus for MockBus {
    async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, BusError> {
        if let Some(reply) = self.record(BusMethod::GetAll, path, interface, None) {
            return scripted(BusMethod::GetAll, reply).await;
        }
        self.lookup(path, interface)
    }

    async fn get(&self, path: &str, interface: &str, name: &str) -> Result<Value, BusError> {
        if let Some(reply) = self.record(BusMethod::Get, path, interface, Some(name)) {
            return scripted(BusMethod::Get, reply).await;
        }
        self.lookup(path, interface)?.remove(name).ok_or_else(|| {
            BusError::remote(
                DBUS_ERROR_UNKNOWN_PROPERTY,
                format!("No such property '{}'", name),
            )
        })
    }

    async fn set(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<(), BusError> {
        if let Some(reply) = self.record(BusMethod::Set, path, interface, Some(name)) {
            return scripted(BusMethod::Set, reply).await;
        }
        self.lookup(path, interface)?;

        let echo = {
            let mut state = self.state.borrow_mut();
            state.sets.push((
                path.to_string(),
                interface.to_string(),
                name.to_string(),
                value.clone(),
            ));
            state.echo_sets
        };
        if echo {
            let mut changes = PropertyMap::new();
            changes.insert(name.to_string(), value);
            self.emit_properties_changed(path, interface, changes);
        } else if let Some(props) = self
            .state
            .borrow_mut()
            .objects
            .get_mut(&(path.to_string(), interface.to_string()))
        {
            props.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn subscribe(&self, path: &str, interface: &str) -> Result<ChangeStream, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.borrow_mut().subscribers.push(Subscriber {
            path: path.to_string(),
            interface: interface.to_string(),
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed_local())
    }
}
