// message.rs - Command / event / system-event staging buffers
//
// Each buffer pairs a name -> id registry with per-id append-only
// lists that live for exactly one tick. Commands arrive from outside
// the tick, events leave to outside consumers, system-events pass
// between systems within a tick. Appends take the outer lock in read
// mode plus a per-queue mutex, so concurrent systems only contend on
// the queue they actually touch.

use crate::ecs::bitset::MAX_IDS;
use crate::ecs::component::{validate_name, RegistryError};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use thiserror::Error;

pub type MessageId = u32;

/// Marker trait for message payload types.
pub trait Message: Clone + Send + Sync + 'static {}

impl<T> Message for T where T: Clone + Send + Sync + 'static {}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("command '{name}' is not registered")]
    UnregisteredCommand { name: String },

    #[error("failed to decode command '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Shared name -> id registry used by all three buffer kinds.
struct MessageRegistry {
    kind: &'static str,
    names: Vec<String>,
    type_names: Vec<&'static str>,
    by_name: HashMap<String, MessageId>,
    by_type: HashMap<TypeId, MessageId>,
}

impl MessageRegistry {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            names: Vec::new(),
            type_names: Vec::new(),
            by_name: HashMap::new(),
            by_type: HashMap::new(),
        }
    }

    fn register(
        &mut self,
        name: &str,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<(MessageId, bool), RegistryError> {
        validate_name(name)?;
        if let Some(&id) = self.by_name.get(name) {
            if self.type_names[id as usize] != type_name {
                return Err(RegistryError::TypeMismatch {
                    name: name.to_string(),
                });
            }
            return Ok((id, false));
        }
        if self.names.len() >= MAX_IDS {
            return Err(RegistryError::Exhausted { cap: MAX_IDS });
        }
        let id = self.names.len() as MessageId;
        self.names.push(name.to_string());
        self.type_names.push(type_name);
        self.by_name.insert(name.to_string(), id);
        self.by_type.insert(type_id, id);
        tracing::debug!(kind = self.kind, name, id, "registered message type");
        Ok((id, true))
    }

    fn id_of(&self, name: &str) -> Result<MessageId, RegistryError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownName {
                name: name.to_string(),
            })
    }

    fn id_of_type(&self, type_id: TypeId, type_name: &'static str) -> Result<MessageId, RegistryError> {
        self.by_type
            .get(&type_id)
            .copied()
            .ok_or(RegistryError::UnknownType { type_name })
    }

    fn descriptors(&self) -> Vec<(String, MessageId, &'static str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as MessageId, self.type_names[id]))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A command handed in from outside the process, still encoded.
#[derive(Debug, Clone)]
pub struct IncomingCommand {
    pub name: String,
    pub payload: Vec<u8>,
    pub sender: String,
}

struct CommandEnvelope {
    value: Box<dyn Any + Send>,
    sender: Option<String>,
}

type CommandDecoder =
    Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, serde_json::Error> + Send + Sync>;

struct CommandInner {
    registry: MessageRegistry,
    decoders: Vec<CommandDecoder>,
    queues: Vec<Mutex<Vec<CommandEnvelope>>>,
}

/// Typed mailbox for commands entering the tick from outside.
pub struct CommandBuffer {
    inner: RwLock<CommandInner>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CommandInner {
                registry: MessageRegistry::new("command"),
                decoders: Vec::new(),
                queues: Vec::new(),
            }),
        }
    }

    /// Register a command payload type under a stable name. The
    /// decoder lets the ingestion boundary turn wire bytes back into
    /// typed values.
    pub fn register<T: Message + DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<MessageId, RegistryError> {
        let mut inner = self.inner.write();
        let (id, fresh) = inner.registry.register(
            name,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
        )?;
        if fresh {
            inner.decoders.push(Box::new(|bytes| {
                serde_json::from_slice::<T>(bytes).map(|v| Box::new(v) as Box<dyn Any + Send>)
            }));
            inner.queues.push(Mutex::new(Vec::new()));
        }
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Result<MessageId, RegistryError> {
        self.inner.read().registry.id_of(name)
    }

    pub fn id_of_type<T: Message>(&self) -> Result<MessageId, RegistryError> {
        self.inner
            .read()
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Stage a typed command for the current tick.
    pub fn enqueue<T: Message>(&self, value: T, sender: Option<String>) -> Result<(), MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        inner.queues[id as usize].lock().push(CommandEnvelope {
            value: Box::new(value),
            sender,
        });
        Ok(())
    }

    /// Ingestion boundary: decode and stage a whole batch, or reject
    /// it without staging anything.
    pub fn inject(&self, batch: &[IncomingCommand]) -> Result<(), MessageError> {
        let inner = self.inner.read();

        // Validate and decode the full batch before touching queues.
        let mut decoded: Vec<(MessageId, CommandEnvelope)> = Vec::with_capacity(batch.len());
        for incoming in batch {
            let id = inner.registry.id_of(&incoming.name).map_err(|_| {
                MessageError::UnregisteredCommand {
                    name: incoming.name.clone(),
                }
            })?;
            let value =
                (inner.decoders[id as usize])(&incoming.payload).map_err(|source| {
                    MessageError::Decode {
                        name: incoming.name.clone(),
                        source,
                    }
                })?;
            decoded.push((
                id,
                CommandEnvelope {
                    value,
                    sender: Some(incoming.sender.clone()),
                },
            ));
        }

        for (id, envelope) in decoded {
            inner.queues[id as usize].lock().push(envelope);
        }
        Ok(())
    }

    /// Read the current tick's commands of one type, in enqueue order.
    pub fn read<T: Message>(&self) -> Result<Vec<(T, Option<String>)>, MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        let queue = inner.queues[id as usize].lock();
        Ok(queue
            .iter()
            .filter_map(|env| {
                env.value
                    .downcast_ref::<T>()
                    .map(|v| (v.clone(), env.sender.clone()))
            })
            .collect())
    }

    /// Empty every queue. Runs once per successful tick.
    pub fn clear_all(&self) {
        let inner = self.inner.read();
        for queue in &inner.queues {
            queue.lock().clear();
        }
    }

    pub fn descriptors(&self) -> Vec<(String, MessageId, &'static str)> {
        self.inner.read().registry.descriptors()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Fast-path capacity per event queue before spilling to the
/// unbounded overflow list.
const FAST_CAPACITY: usize = 64;

struct EventQueue {
    fast: Vec<Box<dyn Any + Send>>,
    overflow: Vec<Box<dyn Any + Send>>,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            fast: Vec::with_capacity(FAST_CAPACITY),
            overflow: Vec::new(),
        }
    }

    fn push(&mut self, value: Box<dyn Any + Send>) {
        if self.fast.len() >= FAST_CAPACITY {
            // Drain the bounded buffer before admitting the new item
            // so readers still observe enqueue order.
            self.overflow.append(&mut self.fast);
        }
        self.fast.push(value);
    }

    fn iter(&self) -> impl Iterator<Item = &Box<dyn Any + Send>> + '_ {
        self.overflow.iter().chain(self.fast.iter())
    }

    fn drain(&mut self) -> Vec<Box<dyn Any + Send>> {
        let mut out = std::mem::take(&mut self.overflow);
        out.append(&mut self.fast);
        out
    }

    fn clear(&mut self) {
        self.fast.clear();
        self.overflow.clear();
    }
}

struct EventInner {
    registry: MessageRegistry,
    queues: Vec<Mutex<EventQueue>>,
}

/// Typed mailbox for events leaving the tick to outside consumers.
pub struct EventBuffer {
    inner: RwLock<EventInner>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(EventInner {
                registry: MessageRegistry::new("event"),
                queues: Vec::new(),
            }),
        }
    }

    pub fn register<T: Message>(&self, name: &str) -> Result<MessageId, RegistryError> {
        let mut inner = self.inner.write();
        let (id, fresh) = inner.registry.register(
            name,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
        )?;
        if fresh {
            inner.queues.push(Mutex::new(EventQueue::new()));
        }
        Ok(id)
    }

    pub fn id_of_type<T: Message>(&self) -> Result<MessageId, RegistryError> {
        self.inner
            .read()
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn emit<T: Message>(&self, value: T) -> Result<(), MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        inner.queues[id as usize].lock().push(Box::new(value));
        Ok(())
    }

    /// Read this tick's events of one type in enqueue order
    /// (overflow first, then the fast buffer).
    pub fn read<T: Message>(&self) -> Result<Vec<T>, MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        let queue = inner.queues[id as usize].lock();
        Ok(queue
            .iter()
            .filter_map(|v| v.downcast_ref::<T>().cloned())
            .collect())
    }

    /// Drain this tick's events for an outside consumer.
    pub fn take<T: Message>(&self) -> Result<Vec<T>, MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        let drained = inner.queues[id as usize].lock().drain();
        Ok(drained
            .into_iter()
            .filter_map(|v| v.downcast::<T>().ok().map(|b| *b))
            .collect())
    }

    pub fn clear_all(&self) {
        let inner = self.inner.read();
        for queue in &inner.queues {
            queue.lock().clear();
        }
    }

    pub fn descriptors(&self) -> Vec<(String, MessageId, &'static str)> {
        self.inner.read().registry.descriptors()
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// System events
// ---------------------------------------------------------------------------

struct SystemEventInner {
    registry: MessageRegistry,
    queues: Vec<Mutex<Vec<Box<dyn Any + Send>>>>,
}

/// Typed mailbox for messages passed between systems within one tick.
pub struct SystemEventBuffer {
    inner: RwLock<SystemEventInner>,
}

impl SystemEventBuffer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SystemEventInner {
                registry: MessageRegistry::new("system_event"),
                queues: Vec::new(),
            }),
        }
    }

    pub fn register<T: Message>(&self, name: &str) -> Result<MessageId, RegistryError> {
        let mut inner = self.inner.write();
        let (id, fresh) = inner.registry.register(
            name,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
        )?;
        if fresh {
            inner.queues.push(Mutex::new(Vec::new()));
        }
        Ok(id)
    }

    pub fn id_of_type<T: Message>(&self) -> Result<MessageId, RegistryError> {
        self.inner
            .read()
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn emit<T: Message>(&self, value: T) -> Result<(), MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        inner.queues[id as usize].lock().push(Box::new(value));
        Ok(())
    }

    pub fn read<T: Message>(&self) -> Result<Vec<T>, MessageError> {
        let inner = self.inner.read();
        let id = inner
            .registry
            .id_of_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        let queue = inner.queues[id as usize].lock();
        Ok(queue
            .iter()
            .filter_map(|v| v.downcast_ref::<T>().cloned())
            .collect())
    }

    pub fn clear_all(&self) {
        let inner = self.inner.read();
        for queue in &inner.queues {
            queue.lock().clear();
        }
    }

    pub fn descriptors(&self) -> Vec<(String, MessageId, &'static str)> {
        self.inner.read().registry.descriptors()
    }
}

impl Default for SystemEventBuffer {
    fn default() -> Self {
        Self::new()
    }
}
