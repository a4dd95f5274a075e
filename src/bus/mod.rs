//! Bus session facade.
//!
//! [`Bus`] is the native counterpart of a managed bus attachment. It owns every
//! callback adapter created on the attachment's behalf and decides when each may
//! be released: an adapter is detached only after the native call that removes
//! its association (unregister, unbind, leave) reports success, because only then
//! can no further callback reach it.
//!
//! `Bus` is shared through `Arc`. Every proxy bus object holds one counted
//! reference, so the attachment outlives all of its proxies regardless of the
//! order in which the managed side destroys them.

pub mod entry;
pub mod proxy;

pub use proxy::ProxyBusObject;

use crate::context::MessageContext;
use crate::listeners::{
    AuthListenerAdapter, BusListenerAdapter, BusObjectAdapter, JoinSessionListenerAdapter, KeyStoreListenerAdapter,
    SessionListenerAdapter, SessionPortListenerAdapter, SignalHandlerAdapter,
};
use crate::managed::builtin::{message_context_object, session_opts_from_object};
use crate::managed::{get_handle, set_handle, Env, Handle, ObjectRef, Value, Vm, WeakObjectRef};
use crate::msg::marshal_args;
use crate::native::{
    AuthListener, BusListener, BusObject, InterfaceDescription, JoinSessionCallback, KeyStoreListener, Member,
    NativeBus, SessionListener, SessionOpts, SessionPortListener, SignalReceiver,
};
use crate::types::{BusConfig, Error, Guid, NativeStatus, Result, SessionId, SessionPort, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Signal may be delivered to peers that join later, without a session.
pub const FLAG_SESSIONLESS: u8 = 0x10;
/// Broadcast signal is forwarded across bus-to-bus connections.
pub const FLAG_GLOBAL_BROADCAST: u8 = 0x20;
pub const FLAG_ENCRYPTED: u8 = 0x80;

/// Security configuration applied on connect.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Overrides [`BusConfig::connect_spec`].
    pub connect_spec: Option<String>,
    /// Space separated authentication mechanisms. Empty disables peer security.
    pub auth_mechanisms: String,
    pub auth_listener: Option<ObjectRef>,
    pub key_store_listener: Option<ObjectRef>,
    pub key_store_file: Option<String>,
    pub shared_key_store: bool,
}

/// Association table sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationCounts {
    pub bus_listeners: usize,
    pub bus_objects: usize,
    pub signal_handlers: usize,
    pub session_ports: usize,
    pub sessions: usize,
    pub pending_joins: usize,
}

/// Security listeners. The adapters hold them weakly; these strong references
/// keep them alive while peer security is enabled.
#[derive(Debug, Default)]
struct Security {
    key_store: Option<(ObjectRef, Arc<KeyStoreListenerAdapter>)>,
    auth: Option<(ObjectRef, Arc<AuthListenerAdapter>)>,
}

impl Security {
    fn release(&mut self) {
        if let Some((_, adapter)) = self.key_store.take() {
            adapter.binding().detach();
        }
        if let Some((_, adapter)) = self.auth.take() {
            adapter.binding().detach();
        }
    }
}

/// A registered bus listener and the handle stored in its `handle` field.
#[derive(Debug)]
struct ListenerEntry {
    listener: WeakObjectRef,
    handle: Handle,
    adapter: Arc<BusListenerAdapter>,
}

/// Exported objects, plus the registrations still waiting on the native side.
#[derive(Debug, Default)]
struct ObjectTable {
    registered: HashMap<String, Arc<BusObjectAdapter>>,
    pending: HashMap<String, ObjectRef>,
}

impl ObjectTable {
    fn claims(&self, object: &ObjectRef, path: &str) -> bool {
        self.registered.contains_key(path)
            || self.pending.contains_key(path)
            || self.registered.values().any(|a| a.binding().is_bound_to(object))
            || self.pending.values().any(|o| Arc::ptr_eq(o, object))
    }

    fn path_of(&self, object: &ObjectRef) -> Option<String> {
        self.registered
            .iter()
            .find(|(_, a)| a.binding().is_bound_to(object))
            .map(|(path, _)| path.clone())
    }
}

/// An asynchronous join the native side has accepted but not yet completed.
///
/// The facade keeps it in its pending table; completion takes it out, records
/// the session listener on success, and reports to the managed listener.
#[derive(Debug)]
struct PendingJoin {
    bus: Weak<Bus>,
    listener: Arc<JoinSessionListenerAdapter>,
    session_listener: Option<Arc<SessionListenerAdapter>>,
}

impl PendingJoin {
    fn release(&self) {
        self.listener.binding().detach();
        if let Some(adapter) = &self.session_listener {
            adapter.binding().detach();
        }
    }
}

impl JoinSessionCallback for PendingJoin {
    fn join_session_complete(&self, result: NativeStatus, session_id: SessionId, opts: &SessionOpts) {
        let Some(bus) = self.bus.upgrade() else {
            self.release();
            return;
        };
        let was_pending = {
            let mut pending = lock(&bus.pending_joins);
            let before = pending.len();
            pending.retain(|join| !std::ptr::eq(Arc::as_ptr(join), self));
            before != pending.len()
        };
        if !was_pending {
            tracing::debug!(session_id = %session_id, "join completed after its attachment released it");
            return;
        }

        match &self.session_listener {
            Some(adapter) if result.is_ok() => {
                if let Some(previous) = lock(&bus.sessions).insert(session_id, Arc::clone(adapter)) {
                    previous.binding().detach();
                }
            }
            Some(adapter) => adapter.binding().detach(),
            None => {}
        }
        self.listener.on_join_session(result, session_id, opts);
        self.listener.binding().detach();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status(native: NativeStatus) -> Status {
    Status::from_native(native)
}

pub struct Bus {
    vm: Arc<Vm>,
    native: Arc<dyn NativeBus>,
    config: BusConfig,
    connect_spec: Mutex<Option<String>>,
    bus_listeners: Mutex<Vec<ListenerEntry>>,
    bus_objects: Mutex<ObjectTable>,
    signal_handlers: Mutex<Vec<Arc<SignalHandlerAdapter>>>,
    session_ports: Mutex<HashMap<SessionPort, Arc<SessionPortListenerAdapter>>>,
    sessions: Mutex<HashMap<SessionId, Arc<SessionListenerAdapter>>>,
    pending_joins: Mutex<Vec<Arc<PendingJoin>>>,
    security: Mutex<Security>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("application", &self.config.application_name)
            .field("associations", &self.association_counts())
            .finish_non_exhaustive()
    }
}

impl Bus {
    pub fn new(vm: &Arc<Vm>, native: Arc<dyn NativeBus>, config: BusConfig) -> Arc<Self> {
        tracing::debug!(
            application = %config.application_name,
            allow_remote_messages = config.allow_remote_messages,
            "bus attachment created"
        );
        native.set_allow_remote_messages(config.allow_remote_messages);
        Arc::new(Self {
            vm: Arc::clone(vm),
            native,
            config,
            connect_spec: Mutex::new(None),
            bus_listeners: Mutex::new(Vec::new()),
            bus_objects: Mutex::new(ObjectTable::default()),
            signal_handlers: Mutex::new(Vec::new()),
            session_ports: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            pending_joins: Mutex::new(Vec::new()),
            security: Mutex::new(Security::default()),
        })
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn native(&self) -> &Arc<dyn NativeBus> {
        &self.native
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn association_counts(&self) -> AssociationCounts {
        AssociationCounts {
            bus_listeners: lock(&self.bus_listeners).len(),
            bus_objects: lock(&self.bus_objects).registered.len(),
            signal_handlers: lock(&self.signal_handlers).len(),
            session_ports: lock(&self.session_ports).len(),
            sessions: lock(&self.sessions).len(),
            pending_joins: lock(&self.pending_joins).len(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the attachment, enable peer security if mechanisms are given, and
    /// connect. Any failure leaves the attachment disconnected.
    pub fn connect(&self, env: &Env, options: &ConnectOptions) -> Result<Status> {
        let started = self.native.start();
        if !started.is_ok() && started != NativeStatus::BUS_ALREADY_STARTED {
            return Ok(status(started));
        }

        if !options.auth_mechanisms.is_empty() {
            match self.install_security(env, options) {
                Ok(result) if result.is_ok() => {}
                Ok(result) => {
                    self.disconnect();
                    return Ok(result);
                }
                Err(err) => {
                    self.disconnect();
                    return Err(err);
                }
            }
        }

        let spec = options
            .connect_spec
            .clone()
            .unwrap_or_else(|| self.config.connect_spec.clone());
        let connected = self.native.connect(&spec);
        if !connected.is_ok() {
            tracing::warn!(%spec, status = %connected, "connect failed");
            self.disconnect();
            return Ok(status(connected));
        }
        *lock(&self.connect_spec) = Some(spec);
        Ok(Status::Ok)
    }

    /// Enable peer security on a started attachment.
    pub fn enable_peer_security(&self, env: &Env, options: &ConnectOptions) -> Result<Status> {
        if !self.native.is_started() {
            return Ok(Status::BusNotStarted);
        }
        self.install_security(env, options)
    }

    fn install_security(&self, env: &Env, options: &ConnectOptions) -> Result<Status> {
        let key_store = match &options.key_store_listener {
            Some(listener) => Some((Arc::clone(listener), KeyStoreListenerAdapter::new(env, listener)?)),
            None => None,
        };
        let auth = match &options.auth_listener {
            Some(listener) => Some((Arc::clone(listener), AuthListenerAdapter::new(env, listener)?)),
            None => None,
        };

        if let Some((_, adapter)) = &key_store {
            adapter.binding().activate()?;
            let registered = self
                .native
                .register_key_store_listener(Arc::clone(adapter) as Arc<dyn KeyStoreListener>);
            if !registered.is_ok() {
                adapter.binding().detach();
                return Ok(status(registered));
            }
        }
        if let Some((_, adapter)) = &auth {
            adapter.binding().activate()?;
        }

        let auth_listener = auth
            .as_ref()
            .map(|(_, adapter)| Arc::clone(adapter) as Arc<dyn AuthListener>);
        let enabled = self.native.enable_peer_security(
            &options.auth_mechanisms,
            auth_listener,
            options.key_store_file.as_deref(),
            options.shared_key_store,
        );

        let mut security = lock(&self.security);
        if enabled.is_ok() {
            security.release();
            security.key_store = key_store;
            security.auth = auth;
            tracing::debug!(mechanisms = %options.auth_mechanisms, "peer security enabled");
        } else {
            let bindings = key_store.iter().map(|(_, a)| a.binding());
            for binding in bindings.chain(auth.iter().map(|(_, a)| a.binding())) {
                binding.detach();
            }
        }
        Ok(status(enabled))
    }

    /// Tear the attachment down and release every adapter. Idempotent.
    pub fn disconnect(&self) -> Status {
        self.release_associations();

        if let Some(spec) = lock(&self.connect_spec).take() {
            let result = self.native.disconnect(&spec);
            if !result.is_ok() {
                tracing::warn!(%spec, status = %result, "native disconnect failed");
            }
        }
        if self.native.is_started() {
            let result = self.native.stop();
            if !result.is_ok() {
                tracing::warn!(status = %result, "native stop failed");
            }
        }
        Status::Ok
    }

    /// Unregister what the native side still references, then detach everything.
    fn release_associations(&self) {
        let listeners = std::mem::take(&mut *lock(&self.bus_listeners));
        for entry in listeners {
            self.release_bus_listener(entry);
        }

        let handlers = std::mem::take(&mut *lock(&self.signal_handlers));
        for adapter in handlers {
            let receiver = Arc::clone(&adapter) as Arc<dyn SignalReceiver>;
            self.native
                .unregister_signal_handler(&receiver, adapter.member(), adapter.source_path());
            self.remove_handler_match(&adapter);
            adapter.binding().detach();
        }

        let objects = std::mem::take(&mut lock(&self.bus_objects).registered);
        for (path, adapter) in objects {
            self.native.unregister_bus_object(&path);
            adapter.binding().detach();
        }

        for (_, adapter) in lock(&self.session_ports).drain() {
            adapter.binding().detach();
        }
        for (_, adapter) in lock(&self.sessions).drain() {
            adapter.binding().detach();
        }
        let joins = std::mem::take(&mut *lock(&self.pending_joins));
        for join in joins {
            join.release();
        }
        lock(&self.security).release();
    }

    pub fn is_connected(&self) -> bool {
        self.native.is_connected()
    }

    pub fn unique_name(&self) -> String {
        self.native.unique_name()
    }

    // =========================================================================
    // Bus listeners
    // =========================================================================

    /// Register a bus listener. Registering the same listener twice is a no-op.
    pub fn register_bus_listener(&self, env: &Env, listener: &ObjectRef) -> Result<()> {
        let adapter = BusListenerAdapter::new(env, listener);
        adapter.binding().activate()?;
        {
            let mut listeners = lock(&self.bus_listeners);
            if listeners.iter().any(|e| e.adapter.binding().is_bound_to(listener)) {
                adapter.binding().detach();
                return Ok(());
            }
            let handle = self.vm.handles().insert(Arc::clone(&adapter));
            if let Err(err) = set_handle(Some(listener), handle) {
                self.vm.handles().remove(handle);
                adapter.binding().detach();
                return Err(err);
            }
            listeners.push(ListenerEntry {
                listener: Arc::downgrade(listener),
                handle,
                adapter: Arc::clone(&adapter),
            });
        }
        self.native.register_bus_listener(adapter);
        Ok(())
    }

    pub fn unregister_bus_listener(&self, _env: &Env, listener: &ObjectRef) -> Result<()> {
        let entry = {
            let mut listeners = lock(&self.bus_listeners);
            let Some(index) = listeners.iter().position(|e| e.adapter.binding().is_bound_to(listener)) else {
                return Ok(());
            };
            listeners.remove(index)
        };
        self.release_bus_listener(entry);
        Ok(())
    }

    /// Unregister, detach, and drop the handle. The listener's `handle` field is
    /// cleared only while it still names this registration.
    fn release_bus_listener(&self, entry: ListenerEntry) {
        self.native
            .unregister_bus_listener(&(Arc::clone(&entry.adapter) as Arc<dyn BusListener>));
        entry.adapter.binding().detach();
        self.vm.handles().remove(entry.handle);

        let Some(listener) = entry.listener.upgrade() else {
            return;
        };
        match get_handle(Some(&listener)) {
            Ok(current) if current == entry.handle => {
                if let Err(err) = set_handle(Some(&listener), Handle::NULL) {
                    tracing::warn!(error = %err, "failed to clear bus listener handle");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failed to read bus listener handle"),
        }
    }

    // =========================================================================
    // Security pass-throughs
    // =========================================================================

    /// Credentials used for `mechanism` when no auth listener supplies them.
    pub fn set_password_credentials(&self, mechanism: &str, password: &str) -> Status {
        status(self.native.set_password_credentials(mechanism, password))
    }

    pub fn clear_key_store(&self) {
        self.native.clear_key_store();
    }

    pub fn clear_keys(&self, guid: &str) -> Status {
        status(self.native.clear_keys(guid))
    }

    pub fn reload_key_store(&self) -> Status {
        status(self.native.reload_key_store())
    }

    // =========================================================================
    // Interfaces and exported objects
    // =========================================================================

    pub fn create_interface(&self, iface: InterfaceDescription) -> Status {
        status(self.native.create_interface(iface))
    }

    /// Export `object` at `path`, implementing the named interfaces.
    ///
    /// Registering the same managed object twice, or a second object at a taken
    /// path, fails with [`Status::BusObjAlreadyExists`] and creates no second
    /// adapter. The object and path are reserved before the native call so that
    /// concurrent registrations cannot both succeed; no lock is held across the
    /// native call because it calls back into the object.
    pub fn register_bus_object(
        &self,
        env: &Env,
        object: &ObjectRef,
        path: &str,
        interface_names: &[&str],
    ) -> Result<Status> {
        {
            let mut table = lock(&self.bus_objects);
            if table.claims(object, path) {
                return Ok(Status::BusObjAlreadyExists);
            }
            table.pending.insert(path.to_string(), Arc::clone(object));
        }

        let exported = self.export_bus_object(env, object, path, interface_names);

        let mut table = lock(&self.bus_objects);
        table.pending.remove(path);
        match exported? {
            Ok(adapter) => {
                table.registered.insert(path.to_string(), adapter);
                tracing::debug!(path, "bus object registered");
                Ok(Status::Ok)
            }
            Err(status) => Ok(status),
        }
    }

    fn export_bus_object(
        &self,
        env: &Env,
        object: &ObjectRef,
        path: &str,
        interface_names: &[&str],
    ) -> Result<std::result::Result<Arc<BusObjectAdapter>, Status>> {
        let mut interfaces = Vec::with_capacity(interface_names.len());
        for name in interface_names {
            match self.native.interface(name) {
                Some(iface) => interfaces.push(iface),
                None => return Ok(Err(Status::BusNoSuchInterface)),
            }
        }

        let adapter = BusObjectAdapter::new(env, &self.native, object, path, interfaces)?;
        adapter.binding().activate()?;
        let registered = self
            .native
            .register_bus_object(Arc::clone(&adapter) as Arc<dyn BusObject>);
        if !registered.is_ok() {
            adapter.binding().detach();
            return Ok(Err(status(registered)));
        }
        Ok(Ok(adapter))
    }

    pub fn unregister_bus_object(&self, object: &ObjectRef) -> Status {
        let Some(path) = self.registered_path(object) else {
            return Status::BusNoSuchObject;
        };
        let result = self.native.unregister_bus_object(&path);
        if result.is_ok() {
            if let Some(adapter) = lock(&self.bus_objects).registered.remove(&path) {
                adapter.binding().detach();
            }
        }
        status(result)
    }

    fn registered_path(&self, object: &ObjectRef) -> Option<String> {
        lock(&self.bus_objects).path_of(object)
    }

    fn member(&self, interface: &str, name: &str) -> std::result::Result<Member, Status> {
        let iface = self.native.interface(interface).ok_or(Status::BusNoSuchInterface)?;
        iface.member(name).cloned().ok_or(Status::BusInterfaceNoSuchMember)
    }

    /// Emit a signal from a registered bus object.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_signal(
        &self,
        env: &Env,
        source: &ObjectRef,
        destination: Option<&str>,
        session_id: SessionId,
        interface: &str,
        signal: &str,
        args: &[Value],
        ttl: u16,
        flags: u8,
    ) -> Result<Status> {
        let Some(path) = self.registered_path(source) else {
            return Ok(Status::BusNoSuchObject);
        };
        let member = match self.member(interface, signal) {
            Ok(member) => member,
            Err(status) => return Ok(status),
        };
        let packed = marshal_args(env, &member.input_sig, args)?;
        let args = packed.members().unwrap_or_default();
        Ok(status(self.native.emit_signal(
            &path,
            destination,
            session_id,
            &member,
            args,
            ttl,
            flags,
        )))
    }

    // =========================================================================
    // Signal handlers
    // =========================================================================

    /// Deliver `interface.signal` to `method_name` of `handler`.
    ///
    /// Handlers are keyed by (object, method): one object may register several
    /// methods, and registering the same pair again replaces the previous handler.
    pub fn register_signal_handler(
        &self,
        env: &Env,
        interface: &str,
        signal: &str,
        handler: &ObjectRef,
        method_name: &str,
        source_path: Option<&str>,
    ) -> Result<Status> {
        let member = match self.member(interface, signal) {
            Ok(member) => member,
            Err(status) => return Ok(status),
        };
        let adapter = SignalHandlerAdapter::new(env, handler, method_name, &member, source_path)?;

        let previous = self.unregister_signal_handler(env, handler, method_name)?;
        if !previous.is_ok() {
            return Ok(previous);
        }

        adapter.binding().activate()?;
        let receiver = Arc::clone(&adapter) as Arc<dyn SignalReceiver>;
        let registered = self.native.register_signal_handler(Arc::clone(&receiver), &member, source_path);
        if !registered.is_ok() {
            adapter.binding().detach();
            return Ok(status(registered));
        }
        let matched = self.native.add_match(&adapter.match_rule());
        if !matched.is_ok() {
            self.native.unregister_signal_handler(&receiver, &member, source_path);
            adapter.binding().detach();
            return Ok(status(matched));
        }
        lock(&self.signal_handlers).push(adapter);
        Ok(Status::Ok)
    }

    pub fn unregister_signal_handler(&self, env: &Env, handler: &ObjectRef, method_name: &str) -> Result<Status> {
        let Some(method) = env.get_method(handler, method_name) else {
            return Err(Error::resolution(format!("{}.{}", handler.class().name(), method_name)));
        };
        let adapter = lock(&self.signal_handlers)
            .iter()
            .find(|a| a.is_handler(handler, &method))
            .cloned();
        let Some(adapter) = adapter else {
            return Ok(Status::Ok);
        };

        let receiver = Arc::clone(&adapter) as Arc<dyn SignalReceiver>;
        let result = self
            .native
            .unregister_signal_handler(&receiver, adapter.member(), adapter.source_path());
        if !result.is_ok() {
            return Ok(status(result));
        }
        self.remove_handler_match(&adapter);
        lock(&self.signal_handlers).retain(|a| !Arc::ptr_eq(a, &adapter));
        adapter.binding().detach();
        Ok(Status::Ok)
    }

    /// Remove a handler's match rule. Failure is logged, not returned.
    fn remove_handler_match(&self, adapter: &SignalHandlerAdapter) {
        let rule = adapter.match_rule();
        let removed = self.native.remove_match(&rule);
        if !removed.is_ok() {
            tracing::warn!(%rule, status = %removed, "failed to remove signal match rule");
        }
    }

    // =========================================================================
    // Names and matches
    // =========================================================================

    pub fn request_name(&self, name: &str, flags: u32) -> Status {
        status(self.native.request_name(name, flags))
    }

    pub fn release_name(&self, name: &str) -> Status {
        status(self.native.release_name(name))
    }

    pub fn add_match(&self, rule: &str) -> Status {
        status(self.native.add_match(rule))
    }

    pub fn remove_match(&self, rule: &str) -> Status {
        status(self.native.remove_match(rule))
    }

    pub fn advertise_name(&self, name: &str, transports: u16) -> Status {
        status(self.native.advertise_name(name, transports))
    }

    pub fn cancel_advertise_name(&self, name: &str, transports: u16) -> Status {
        status(self.native.cancel_advertise_name(name, transports))
    }

    pub fn find_advertised_name(&self, name_prefix: &str) -> Status {
        status(self.native.find_advertised_name(name_prefix))
    }

    pub fn cancel_find_advertised_name(&self, name_prefix: &str) -> Status {
        status(self.native.cancel_find_advertised_name(name_prefix))
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Bind a session port. [`SessionPort::ANY`] lets the bus choose; the chosen
    /// port is written back to `port`.
    pub fn bind_session_port(
        &self,
        env: &Env,
        port: &mut SessionPort,
        opts: &SessionOpts,
        listener: &ObjectRef,
    ) -> Result<Status> {
        let adapter = SessionPortListenerAdapter::new(env, listener)?;
        adapter.binding().activate()?;

        let result = self.native.bind_session_port(
            port,
            opts,
            Arc::clone(&adapter) as Arc<dyn SessionPortListener>,
        );
        if !result.is_ok() {
            adapter.binding().detach();
            return Ok(status(result));
        }
        if let Some(previous) = lock(&self.session_ports).insert(*port, adapter) {
            previous.binding().detach();
        }
        tracing::debug!(port = %port, "session port bound");
        Ok(Status::Ok)
    }

    pub fn unbind_session_port(&self, port: SessionPort) -> Status {
        let result = self.native.unbind_session_port(port);
        if result.is_ok() {
            if let Some(adapter) = lock(&self.session_ports).remove(&port) {
                adapter.binding().detach();
            }
        }
        status(result)
    }

    /// Join a hosted session. On success the session id and the negotiated
    /// options are written back.
    pub fn join_session(
        &self,
        env: &Env,
        host: &str,
        port: SessionPort,
        listener: Option<&ObjectRef>,
        session_id: &mut SessionId,
        opts: &mut SessionOpts,
    ) -> Result<Status> {
        let adapter = listener.map(|l| SessionListenerAdapter::new(env, l));
        if let Some(adapter) = &adapter {
            adapter.binding().activate()?;
        }

        let native_listener = adapter
            .as_ref()
            .map(|a| Arc::clone(a) as Arc<dyn SessionListener>);
        let result = self
            .native
            .join_session(host, port, native_listener, session_id, opts);
        if !result.is_ok() {
            if let Some(adapter) = adapter {
                adapter.binding().detach();
            }
            return Ok(status(result));
        }
        if let Some(adapter) = adapter {
            if let Some(previous) = lock(&self.sessions).insert(*session_id, adapter) {
                previous.binding().detach();
            }
        }
        Ok(Status::Ok)
    }

    /// Start joining a hosted session without waiting for the outcome.
    ///
    /// `opts` is a managed session-options object. `on_joined` is told the
    /// outcome, with `context` passed through, and is released afterwards. On
    /// success `listener` becomes the session's listener. If the start itself
    /// fails, no callback follows and the status is returned here.
    #[allow(clippy::too_many_arguments)]
    pub fn join_session_async(
        self: &Arc<Self>,
        env: &Env,
        host: &str,
        port: SessionPort,
        opts: &ObjectRef,
        listener: Option<&ObjectRef>,
        on_joined: &ObjectRef,
        context: Option<&ObjectRef>,
    ) -> Result<Status> {
        let opts = session_opts_from_object(opts)?;
        let session_listener = listener.map(|l| SessionListenerAdapter::new(env, l));
        if let Some(adapter) = &session_listener {
            adapter.binding().activate()?;
        }
        let join_listener = JoinSessionListenerAdapter::new(env, on_joined, context);
        join_listener.binding().activate()?;

        let join = Arc::new(PendingJoin {
            bus: Arc::downgrade(self),
            listener: join_listener,
            session_listener,
        });
        // Recorded before the native call: completion may arrive on another
        // thread before it returns.
        lock(&self.pending_joins).push(Arc::clone(&join));

        let native_listener = join
            .session_listener
            .as_ref()
            .map(|a| Arc::clone(a) as Arc<dyn SessionListener>);
        let result = self.native.join_session_async(
            host,
            port,
            native_listener,
            &opts,
            Arc::clone(&join) as Arc<dyn JoinSessionCallback>,
        );
        if !result.is_ok() {
            lock(&self.pending_joins).retain(|pending| !Arc::ptr_eq(pending, &join));
            join.release();
            return Ok(status(result));
        }
        tracing::debug!(host, port = %port, "asynchronous join started");
        Ok(Status::Ok)
    }

    pub fn leave_session(&self, session_id: SessionId) -> Status {
        let result = self.native.leave_session(session_id);
        if result.is_ok() {
            if let Some(adapter) = lock(&self.sessions).remove(&session_id) {
                adapter.binding().detach();
            }
        }
        status(result)
    }

    /// Replace the listener of a session.
    ///
    /// On success the previous adapter is released. If the session no longer
    /// exists, both the previous and the new adapter are released. Any other
    /// failure keeps the previous listener in place.
    pub fn set_session_listener(
        &self,
        env: &Env,
        session_id: SessionId,
        listener: Option<&ObjectRef>,
    ) -> Result<Status> {
        let adapter = listener.map(|l| SessionListenerAdapter::new(env, l));
        if let Some(adapter) = &adapter {
            adapter.binding().activate()?;
        }

        let native_listener = adapter
            .as_ref()
            .map(|a| Arc::clone(a) as Arc<dyn SessionListener>);
        let result = self.native.set_session_listener(session_id, native_listener);

        let mut sessions = lock(&self.sessions);
        if result.is_ok() {
            let previous = match adapter {
                Some(adapter) => sessions.insert(session_id, adapter),
                None => sessions.remove(&session_id),
            };
            if let Some(previous) = previous {
                previous.binding().detach();
            }
        } else {
            if let Some(adapter) = adapter {
                adapter.binding().detach();
            }
            if result == NativeStatus::BUS_NO_SESSION {
                if let Some(previous) = sessions.remove(&session_id) {
                    previous.binding().detach();
                }
            }
        }
        Ok(status(result))
    }

    pub fn session_fd(&self, session_id: SessionId) -> std::result::Result<i32, Status> {
        self.native.session_fd(session_id).map_err(status)
    }

    pub fn peer_guid(&self, name: &str) -> std::result::Result<Guid, Status> {
        let raw = self.native.peer_guid(name).map_err(status)?;
        Guid::from_string(raw).map_err(|_| Status::BusNoPeerGuid)
    }

    pub fn set_daemon_debug(&self, module: &str, level: u32) -> Status {
        status(self.native.set_daemon_debug(module, level))
    }

    /// Managed snapshot of the message being dispatched on this thread.
    pub fn get_message_context(&self) -> Result<ObjectRef> {
        MessageContext::try_current()
            .map(|message| message_context_object(&message))
            .ok_or_else(|| Error::state_transition("no message is being dispatched on this thread"))
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.disconnect();
        tracing::debug!(application = %self.config.application_name, "bus attachment destroyed");
    }
}
