//! Component registry and controller lifecycle
//!
//! The registry is the directory the command dispatcher resolves peripherals
//! through: a name -> component table plus an ordered list of controllers
//! (anything with a start/stop lifecycle). Shutdown walks the controller
//! list in reverse registration order so dependents stop before the
//! backends they sit on.
//!
//! The registry is an explicitly constructed instance owned by the
//! application bootstrap and passed by `Arc`; tests build their own
//! independent registries.

use crate::audio::AudioPlayer;
use crate::bus::BusController;
use crate::error::Result;
use crate::ports::digital::DigitalPort;
use crate::ports::pwm::PwmPort;
use crate::ports::servo::ServoPort;
use crate::ports::uart::SerialChannel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Start/stop lifecycle capability
///
/// `stop` must be idempotent and safe to call on a controller that was never
/// started. A controller must not be started twice without an intervening
/// stop.
pub trait Controller: Send + Sync {
    /// Logical name used in lifecycle logs
    fn name(&self) -> &str;

    /// Start background work (threads, device init)
    fn start(&self) -> Result<()>;

    /// Stop background work, blocking until owned threads have exited
    fn stop(&self) -> Result<()>;
}

/// A registered peripheral, tagged by capability
///
/// The dispatcher matches on the variant it expects for a command; a name
/// bound to the wrong capability behaves exactly like an unregistered name
/// (the protocol's zero/no-op policy).
#[derive(Clone)]
pub enum Component {
    Digital(Arc<DigitalPort>),
    Pwm(Arc<PwmPort>),
    Servo(Arc<ServoPort>),
    Uart(Arc<dyn SerialChannel>),
    Bus(Arc<BusController>),
    Audio(Arc<dyn AudioPlayer>),
}

/// Name -> component directory plus controller shutdown order
#[derive(Default)]
pub struct Registry {
    components: Mutex<HashMap<String, Component>>,
    controllers: Mutex<Vec<Arc<dyn Controller>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under a name. Unconditional upsert: a later
    /// registration for the same name overwrites the earlier one.
    pub fn register(&self, name: &str, component: Component) {
        log::debug!("registering component: {}", name);
        self.components
            .lock()
            .insert(name.to_string(), component);
    }

    /// Look up a component by name. Never errors; an unknown name is a
    /// defined condition the caller maps to the zero/no-op policy.
    pub fn get(&self, name: &str) -> Option<Component> {
        self.components.lock().get(name).cloned()
    }

    /// Append a controller to the ordered shutdown list
    pub fn register_controller(&self, controller: Arc<dyn Controller>) {
        log::debug!("registering controller: {}", controller.name());
        self.controllers.lock().push(controller);
    }

    /// Stop all controllers in reverse registration order
    ///
    /// Individual stop failures are logged, never propagated: one
    /// controller's failure must not prevent the rest from stopping.
    pub fn stop_all(&self) {
        let snapshot: Vec<Arc<dyn Controller>> = self.controllers.lock().clone();
        for controller in snapshot.iter().rev() {
            log::info!("stopping controller: {}", controller.name());
            if let Err(e) = controller.stop() {
                log::error!("controller {} stop failed: {}", controller.name(), e);
            }
        }
    }

    /// Registered component count (diagnostics)
    pub fn len(&self) -> usize {
        self.components.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.lock().is_empty()
    }

    // Typed lookups used by the dispatcher. A name bound to a different
    // capability resolves to None.

    pub fn digital(&self, name: &str) -> Option<Arc<DigitalPort>> {
        match self.get(name) {
            Some(Component::Digital(p)) => Some(p),
            _ => None,
        }
    }

    pub fn pwm(&self, name: &str) -> Option<Arc<PwmPort>> {
        match self.get(name) {
            Some(Component::Pwm(p)) => Some(p),
            _ => None,
        }
    }

    pub fn servo(&self, name: &str) -> Option<Arc<ServoPort>> {
        match self.get(name) {
            Some(Component::Servo(p)) => Some(p),
            _ => None,
        }
    }

    pub fn uart(&self, name: &str) -> Option<Arc<dyn SerialChannel>> {
        match self.get(name) {
            Some(Component::Uart(c)) => Some(c),
            _ => None,
        }
    }

    pub fn bus(&self, name: &str) -> Option<Arc<BusController>> {
        match self.get(name) {
            Some(Component::Bus(b)) => Some(b),
            _ => None,
        }
    }

    pub fn audio(&self, name: &str) -> Option<Arc<dyn AudioPlayer>> {
        match self.get(name) {
            Some(Component::Audio(a)) => Some(a),
            _ => None,
        }
    }
}
