//! In-memory loopback implementation of [`NativeBus`].
//!
//! Records every registration, reply, signal and call so tests can assert on
//! what the bridge handed to the native side, and drives callbacks into the
//! registered adapters through the `simulate_*` helpers. Callbacks are always
//! invoked with the internal lock released.

use crate::msg::MsgArg;
use crate::native::{
    AuthListener, BusListener, BusObject, CallFailure, CredentialMask, Credentials, InterfaceDescription,
    JoinSessionCallback, KeyStore, KeyStoreListener, Member, Message, MethodCall, NativeBus, Reply, SessionListener, SessionOpts,
    SessionPortListener, SignalReceiver,
};
use crate::types::{NativeStatus, SessionId, SessionPort};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Port handed out when a bind asks for [`SessionPort::ANY`].
pub const FIRST_DYNAMIC_PORT: u16 = 42;

const FIRST_SESSION_ID: u32 = 1000;

/// Identity comparison of trait objects, ignoring vtables.
fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A signal handed to [`NativeBus::emit_signal`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSignal {
    pub source_path: String,
    pub destination: Option<String>,
    pub session_id: SessionId,
    pub interface: String,
    pub member: String,
    pub args: Vec<MsgArg>,
    pub ttl: u16,
    pub flags: u8,
}

/// Key store held in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryKeyStore {
    pub keys: Vec<u8>,
    pub password: Vec<u8>,
}

impl KeyStore for MemoryKeyStore {
    fn put_keys(&mut self, source: &[u8], password: &[u8]) -> NativeStatus {
        self.keys = source.to_vec();
        self.password = password.to_vec();
        NativeStatus::OK
    }

    fn get_keys(&self) -> Result<Vec<u8>, NativeStatus> {
        Ok(self.keys.clone())
    }
}

struct PendingJoin {
    listener: Option<Arc<dyn SessionListener>>,
    opts: SessionOpts,
    callback: Arc<dyn JoinSessionCallback>,
}

struct SignalRegistration {
    receiver: Arc<dyn SignalReceiver>,
    member: Member,
    source_path: Option<String>,
}

#[derive(Default)]
struct LoopbackState {
    started: bool,
    connect_spec: Option<String>,
    allow_remote_messages: Option<bool>,
    password_credentials: Option<(String, String)>,
    pending_joins: Vec<PendingJoin>,
    bus_listeners: Vec<Arc<dyn BusListener>>,
    key_store_listener: Option<Arc<dyn KeyStoreListener>>,
    auth_mechanisms: Option<String>,
    auth_listener: Option<Arc<dyn AuthListener>>,
    key_store: MemoryKeyStore,
    interfaces: HashMap<String, Arc<InterfaceDescription>>,
    objects: HashMap<String, Arc<dyn BusObject>>,
    signal_handlers: Vec<SignalRegistration>,
    match_rules: Vec<String>,
    owned_names: HashSet<String>,
    advertised_names: HashSet<String>,
    name_queries: HashSet<String>,
    session_ports: HashMap<SessionPort, Arc<dyn SessionPortListener>>,
    sessions: HashMap<SessionId, Option<Arc<dyn SessionListener>>>,
    next_session_id: u32,
    next_serial: u32,
    replies: Vec<Reply>,
    signals: Vec<EmittedSignal>,
    calls: Vec<MethodCall>,
    call_results: VecDeque<Result<Vec<MsgArg>, CallFailure>>,
    remote_properties: HashMap<String, MsgArg>,
    forced: HashMap<String, NativeStatus>,
    daemon_debug: HashMap<String, u32>,
}

/// Loopback native bus.
pub struct LoopbackBus {
    unique_name: String,
    state: Mutex<LoopbackState>,
}

impl std::fmt::Debug for LoopbackBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBus")
            .field("unique_name", &self.unique_name)
            .finish_non_exhaustive()
    }
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Self::with_unique_name(":1.1")
    }

    pub fn with_unique_name(unique_name: &str) -> Arc<Self> {
        Arc::new(Self {
            unique_name: unique_name.to_string(),
            state: Mutex::new(LoopbackState {
                next_session_id: FIRST_SESSION_ID,
                ..LoopbackState::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `operation` (a [`NativeBus`] method name) fail with `status`.
    pub fn fail_next(&self, operation: &str, status: NativeStatus) {
        self.state().forced.insert(operation.to_string(), status);
    }

    fn forced(state: &mut LoopbackState, operation: &str) -> Option<NativeStatus> {
        state.forced.remove(operation)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn sent_replies(&self) -> Vec<Reply> {
        self.state().replies.clone()
    }

    pub fn emitted_signals(&self) -> Vec<EmittedSignal> {
        self.state().signals.clone()
    }

    pub fn method_calls(&self) -> Vec<MethodCall> {
        self.state().calls.clone()
    }

    pub fn match_rules(&self) -> Vec<String> {
        self.state().match_rules.clone()
    }

    pub fn object_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.state().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn bus_listener_count(&self) -> usize {
        self.state().bus_listeners.len()
    }

    pub fn signal_handler_count(&self) -> usize {
        self.state().signal_handlers.len()
    }

    pub fn bound_ports(&self) -> Vec<SessionPort> {
        let mut ports: Vec<_> = self.state().session_ports.keys().copied().collect();
        ports.sort();
        ports
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.state().sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn owns_name(&self, name: &str) -> bool {
        self.state().owned_names.contains(name)
    }

    pub fn is_advertising(&self, name: &str) -> bool {
        self.state().advertised_names.contains(name)
    }

    pub fn auth_mechanisms(&self) -> Option<String> {
        self.state().auth_mechanisms.clone()
    }

    pub fn has_key_store_listener(&self) -> bool {
        self.state().key_store_listener.is_some()
    }

    pub fn key_store(&self) -> MemoryKeyStore {
        self.state().key_store.clone()
    }

    pub fn allow_remote_messages(&self) -> Option<bool> {
        self.state().allow_remote_messages
    }

    /// Mechanism and password last set through the password manager.
    pub fn password_credentials(&self) -> Option<(String, String)> {
        self.state().password_credentials.clone()
    }

    pub fn pending_join_count(&self) -> usize {
        self.state().pending_joins.len()
    }

    pub fn daemon_debug_level(&self, module: &str) -> Option<u32> {
        self.state().daemon_debug.get(module).copied()
    }

    /// Listener currently bound to `port`, kept by the caller beyond an unbind.
    pub fn session_port_listener(&self, port: SessionPort) -> Option<Arc<dyn SessionPortListener>> {
        self.state().session_ports.get(&port).cloned()
    }

    pub fn session_listener(&self, session_id: SessionId) -> Option<Arc<dyn SessionListener>> {
        self.state().sessions.get(&session_id).cloned().flatten()
    }

    pub fn bus_object(&self, path: &str) -> Option<Arc<dyn BusObject>> {
        self.state().objects.get(path).cloned()
    }

    // =========================================================================
    // Scripting remote peers
    // =========================================================================

    /// Queue the outcome of the next proxy method call.
    pub fn push_call_result(&self, result: Result<Vec<MsgArg>, CallFailure>) {
        self.state().call_results.push_back(result);
    }

    /// Value of a property on a remote object, as seen by proxies.
    pub fn set_remote_property(&self, interface: &str, property: &str, value: MsgArg) {
        self.state()
            .remote_properties
            .insert(format!("{}.{}", interface, property), value);
    }

    pub fn remote_property(&self, interface: &str, property: &str) -> Option<MsgArg> {
        self.state()
            .remote_properties
            .get(&format!("{}.{}", interface, property))
            .cloned()
    }

    // =========================================================================
    // Driving callbacks
    // =========================================================================

    pub fn simulate_found_advertised_name(&self, name: &str, transport: u16, prefix: &str) {
        let listeners = self.state().bus_listeners.clone();
        for listener in listeners {
            listener.found_advertised_name(name, transport, prefix);
        }
    }

    pub fn simulate_lost_advertised_name(&self, name: &str, transport: u16, prefix: &str) {
        let listeners = self.state().bus_listeners.clone();
        for listener in listeners {
            listener.lost_advertised_name(name, transport, prefix);
        }
    }

    pub fn simulate_name_owner_changed(&self, name: &str, previous: Option<&str>, new: Option<&str>) {
        let listeners = self.state().bus_listeners.clone();
        for listener in listeners {
            listener.name_owner_changed(name, previous, new);
        }
    }

    /// A remote peer joins a bound port. Returns the new session if accepted.
    pub fn simulate_join(&self, port: SessionPort, joiner: &str, opts: &SessionOpts) -> Option<SessionId> {
        let listener = self.state().session_ports.get(&port).cloned()?;
        if !listener.accept_session_joiner(port, joiner, opts) {
            return None;
        }
        let session_id = {
            let mut state = self.state();
            let id = SessionId::new(state.next_session_id);
            state.next_session_id += 1;
            state.sessions.insert(id, None);
            id
        };
        listener.session_joined(port, session_id, joiner);
        Some(session_id)
    }

    /// Finish every outstanding asynchronous join. Joins complete with a new
    /// session while connected and with `BUS_NOT_CONNECTED` otherwise.
    pub fn complete_pending_joins(&self) -> usize {
        let completions: Vec<_> = {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.pending_joins);
            pending
                .into_iter()
                .map(|join| {
                    if state.connect_spec.is_none() {
                        return (join.callback, NativeStatus::BUS_NOT_CONNECTED, SessionId::new(0), join.opts);
                    }
                    let id = SessionId::new(state.next_session_id);
                    state.next_session_id += 1;
                    state.sessions.insert(id, join.listener);
                    (join.callback, NativeStatus::OK, id, join.opts)
                })
                .collect()
        };
        for (callback, status, session_id, opts) in &completions {
            callback.join_session_complete(*status, *session_id, opts);
        }
        completions.len()
    }

    /// The session ends from the remote side.
    pub fn simulate_session_lost(&self, session_id: SessionId) {
        let listener = self.state().sessions.remove(&session_id).flatten();
        if let Some(listener) = listener {
            listener.session_lost(session_id);
        }
    }

    /// Dispatch a method call to the object registered at `path`.
    pub fn simulate_method_call(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<MsgArg>,
        sender: &str,
    ) -> NativeStatus {
        let (object, member, message) = {
            let mut state = self.state();
            let Some(object) = state.objects.get(path).cloned() else {
                return NativeStatus::BUS_NO_SUCH_OBJECT;
            };
            let Some(member) = object
                .interfaces()
                .iter()
                .find(|iface| iface.name() == interface)
                .and_then(|iface| iface.member(member))
                .cloned()
            else {
                return NativeStatus::BUS_OBJECT_NO_SUCH_MEMBER;
            };
            state.next_serial += 1;
            let mut message = Message::new(path, interface, member.name.clone(), args).with_sender(sender);
            message.serial = state.next_serial;
            message.destination = self.unique_name.clone();
            (object, member, message)
        };
        object.method_call(&member, Arc::new(message));
        NativeStatus::OK
    }

    /// Deliver a signal to every matching registered handler.
    pub fn simulate_signal(&self, source_path: &str, interface: &str, member: &str, args: Vec<MsgArg>) -> usize {
        let targets: Vec<_> = self
            .state()
            .signal_handlers
            .iter()
            .filter(|reg| reg.member.interface == interface && reg.member.name == member)
            .filter(|reg| reg.source_path.as_deref().map_or(true, |p| p == source_path))
            .map(|reg| (Arc::clone(&reg.receiver), reg.member.clone()))
            .collect();
        let message = Arc::new(Message::new(source_path, interface, member, args));
        for (receiver, member) in &targets {
            receiver.signal(member, source_path, Arc::clone(&message));
        }
        targets.len()
    }

    pub fn simulate_request_credentials(
        &self,
        mechanism: &str,
        peer: &str,
        requested: CredentialMask,
    ) -> Option<Credentials> {
        let listener = self.state().auth_listener.clone()?;
        let mut credentials = Credentials::default();
        listener
            .request_credentials(mechanism, peer, 1, "", requested, &mut credentials)
            .then_some(credentials)
    }

    pub fn simulate_authentication_complete(&self, mechanism: &str, peer: &str, success: bool) {
        let listener = self.state().auth_listener.clone();
        if let Some(listener) = listener {
            listener.authentication_complete(mechanism, peer, success);
        }
    }

    /// Ask the key-store listener to load the store.
    pub fn simulate_key_store_load(&self) -> NativeStatus {
        let Some(listener) = self.state().key_store_listener.clone() else {
            return NativeStatus::BUS_KEYSTORE_NOT_LOADED;
        };
        let mut store = self.state().key_store.clone();
        let status = listener.load_request(&mut store);
        if status.is_ok() {
            self.state().key_store = store;
        }
        status
    }

    /// Ask the key-store listener to persist the store.
    pub fn simulate_key_store_store(&self) -> NativeStatus {
        let Some(listener) = self.state().key_store_listener.clone() else {
            return NativeStatus::BUS_KEYSTORE_NOT_LOADED;
        };
        let mut store = self.state().key_store.clone();
        listener.store_request(&mut store)
    }
}

impl NativeBus for LoopbackBus {
    fn start(&self) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "start") {
            return status;
        }
        if state.started {
            return NativeStatus::BUS_ALREADY_STARTED;
        }
        state.started = true;
        NativeStatus::OK
    }

    fn stop(&self) -> NativeStatus {
        let listeners = {
            let mut state = self.state();
            if !state.started {
                return NativeStatus::BUS_NOT_STARTED;
            }
            state.started = false;
            state.session_ports.clear();
            state.sessions.clear();
            state.bus_listeners.clone()
        };
        for listener in listeners {
            listener.bus_stopping();
        }
        NativeStatus::OK
    }

    fn is_started(&self) -> bool {
        self.state().started
    }

    fn connect(&self, connect_spec: &str) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "connect") {
            return status;
        }
        if !state.started {
            return NativeStatus::BUS_NOT_STARTED;
        }
        state.connect_spec = Some(connect_spec.to_string());
        NativeStatus::OK
    }

    fn disconnect(&self, connect_spec: &str) -> NativeStatus {
        let mut state = self.state();
        match &state.connect_spec {
            Some(spec) if spec == connect_spec => {
                state.connect_spec = None;
                NativeStatus::OK
            }
            _ => NativeStatus::BUS_NOT_CONNECTED,
        }
    }

    fn is_connected(&self) -> bool {
        self.state().connect_spec.is_some()
    }

    fn unique_name(&self) -> String {
        if self.is_connected() {
            self.unique_name.clone()
        } else {
            String::new()
        }
    }

    fn set_allow_remote_messages(&self, allow: bool) {
        self.state().allow_remote_messages = Some(allow);
    }

    fn register_bus_listener(&self, listener: Arc<dyn BusListener>) {
        self.state().bus_listeners.push(Arc::clone(&listener));
        listener.listener_registered();
    }

    fn unregister_bus_listener(&self, listener: &Arc<dyn BusListener>) {
        let removed = {
            let mut state = self.state();
            let before = state.bus_listeners.len();
            state.bus_listeners.retain(|l| !same(l, listener));
            before != state.bus_listeners.len()
        };
        if removed {
            listener.listener_unregistered();
        }
    }

    fn register_key_store_listener(&self, listener: Arc<dyn KeyStoreListener>) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "register_key_store_listener") {
            return status;
        }
        state.key_store_listener = Some(listener);
        NativeStatus::OK
    }

    fn enable_peer_security(
        &self,
        mechanisms: &str,
        listener: Option<Arc<dyn AuthListener>>,
        _key_store_file: Option<&str>,
        _shared: bool,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "enable_peer_security") {
            return status;
        }
        if !state.started {
            return NativeStatus::BUS_NOT_STARTED;
        }
        if mechanisms.is_empty() {
            state.auth_mechanisms = None;
            state.auth_listener = None;
        } else {
            state.auth_mechanisms = Some(mechanisms.to_string());
            state.auth_listener = listener;
        }
        NativeStatus::OK
    }

    fn set_password_credentials(&self, mechanism: &str, password: &str) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "set_password_credentials") {
            return status;
        }
        state.password_credentials = Some((mechanism.to_string(), password.to_string()));
        NativeStatus::OK
    }

    fn clear_key_store(&self) {
        self.state().key_store = MemoryKeyStore::default();
    }

    fn clear_keys(&self, guid: &str) -> NativeStatus {
        if guid.is_empty() {
            return NativeStatus::BAD_ARG;
        }
        NativeStatus::OK
    }

    fn reload_key_store(&self) -> NativeStatus {
        if self.state().auth_mechanisms.is_none() {
            return NativeStatus::BUS_SECURITY_NOT_ENABLED;
        }
        self.simulate_key_store_load()
    }

    fn create_interface(&self, iface: InterfaceDescription) -> NativeStatus {
        let mut state = self.state();
        if state.interfaces.contains_key(iface.name()) {
            return NativeStatus::BUS_IFACE_ALREADY_EXISTS;
        }
        state.interfaces.insert(iface.name().to_string(), Arc::new(iface));
        NativeStatus::OK
    }

    fn interface(&self, name: &str) -> Option<Arc<InterfaceDescription>> {
        self.state().interfaces.get(name).cloned()
    }

    fn register_bus_object(&self, object: Arc<dyn BusObject>) -> NativeStatus {
        {
            let mut state = self.state();
            if let Some(status) = Self::forced(&mut state, "register_bus_object") {
                return status;
            }
            if state.objects.contains_key(object.path()) {
                return NativeStatus::BUS_OBJ_ALREADY_EXISTS;
            }
            state.objects.insert(object.path().to_string(), Arc::clone(&object));
        }
        object.object_registered();
        NativeStatus::OK
    }

    fn unregister_bus_object(&self, path: &str) -> NativeStatus {
        let removed = self.state().objects.remove(path);
        match removed {
            Some(object) => {
                object.object_unregistered();
                NativeStatus::OK
            }
            None => NativeStatus::BUS_NO_SUCH_OBJECT,
        }
    }

    fn register_signal_handler(
        &self,
        receiver: Arc<dyn SignalReceiver>,
        member: &Member,
        source_path: Option<&str>,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "register_signal_handler") {
            return status;
        }
        state.signal_handlers.push(SignalRegistration {
            receiver,
            member: member.clone(),
            source_path: source_path.map(str::to_string),
        });
        NativeStatus::OK
    }

    fn unregister_signal_handler(
        &self,
        receiver: &Arc<dyn SignalReceiver>,
        member: &Member,
        source_path: Option<&str>,
    ) -> NativeStatus {
        let mut state = self.state();
        let position = state.signal_handlers.iter().position(|reg| {
            same(&reg.receiver, receiver) && &reg.member == member && reg.source_path.as_deref() == source_path
        });
        match position {
            Some(index) => {
                state.signal_handlers.remove(index);
                NativeStatus::OK
            }
            None => NativeStatus::FAIL,
        }
    }

    fn add_match(&self, rule: &str) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "add_match") {
            return status;
        }
        state.match_rules.push(rule.to_string());
        NativeStatus::OK
    }

    fn remove_match(&self, rule: &str) -> NativeStatus {
        let mut state = self.state();
        match state.match_rules.iter().position(|r| r == rule) {
            Some(index) => {
                state.match_rules.remove(index);
                NativeStatus::OK
            }
            None => NativeStatus::BUS_MATCH_RULE_NOT_FOUND,
        }
    }

    fn request_name(&self, name: &str, _flags: u32) -> NativeStatus {
        let mut state = self.state();
        if state.connect_spec.is_none() {
            return NativeStatus::BUS_NOT_CONNECTED;
        }
        if !state.owned_names.insert(name.to_string()) {
            return NativeStatus::BUS_NAME_ALREADY_OWNER;
        }
        NativeStatus::OK
    }

    fn release_name(&self, name: &str) -> NativeStatus {
        if self.state().owned_names.remove(name) {
            NativeStatus::OK
        } else {
            NativeStatus::BUS_NAME_NOT_OWNER
        }
    }

    fn advertise_name(&self, name: &str, _transports: u16) -> NativeStatus {
        self.state().advertised_names.insert(name.to_string());
        NativeStatus::OK
    }

    fn cancel_advertise_name(&self, name: &str, _transports: u16) -> NativeStatus {
        self.state().advertised_names.remove(name);
        NativeStatus::OK
    }

    fn find_advertised_name(&self, name_prefix: &str) -> NativeStatus {
        self.state().name_queries.insert(name_prefix.to_string());
        NativeStatus::OK
    }

    fn cancel_find_advertised_name(&self, name_prefix: &str) -> NativeStatus {
        self.state().name_queries.remove(name_prefix);
        NativeStatus::OK
    }

    fn bind_session_port(
        &self,
        port: &mut SessionPort,
        _opts: &SessionOpts,
        listener: Arc<dyn SessionPortListener>,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "bind_session_port") {
            return status;
        }
        if *port == SessionPort::ANY {
            let free = (FIRST_DYNAMIC_PORT..=u16::MAX)
                .map(SessionPort::new)
                .find(|candidate| !state.session_ports.contains_key(candidate));
            let Some(free) = free else {
                return NativeStatus::BUS_SESSION_PORT_IN_USE;
            };
            *port = free;
        } else if state.session_ports.contains_key(port) {
            return NativeStatus::BUS_SESSION_PORT_IN_USE;
        }
        state.session_ports.insert(*port, listener);
        NativeStatus::OK
    }

    fn unbind_session_port(&self, port: SessionPort) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "unbind_session_port") {
            return status;
        }
        match state.session_ports.remove(&port) {
            Some(_) => NativeStatus::OK,
            None => NativeStatus::BUS_NO_SUCH_SESSION_PORT,
        }
    }

    fn join_session(
        &self,
        _host: &str,
        _port: SessionPort,
        listener: Option<Arc<dyn SessionListener>>,
        session_id: &mut SessionId,
        _opts: &mut SessionOpts,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "join_session") {
            return status;
        }
        if state.connect_spec.is_none() {
            return NativeStatus::BUS_NOT_CONNECTED;
        }
        let id = SessionId::new(state.next_session_id);
        state.next_session_id += 1;
        state.sessions.insert(id, listener);
        *session_id = id;
        NativeStatus::OK
    }

    fn join_session_async(
        &self,
        _host: &str,
        _port: SessionPort,
        listener: Option<Arc<dyn SessionListener>>,
        opts: &SessionOpts,
        callback: Arc<dyn JoinSessionCallback>,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "join_session_async") {
            return status;
        }
        if !state.started {
            return NativeStatus::BUS_NOT_STARTED;
        }
        state.pending_joins.push(PendingJoin {
            listener,
            opts: *opts,
            callback,
        });
        NativeStatus::OK
    }

    fn leave_session(&self, session_id: SessionId) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "leave_session") {
            return status;
        }
        match state.sessions.remove(&session_id) {
            Some(_) => NativeStatus::OK,
            None => NativeStatus::BUS_NO_SESSION,
        }
    }

    fn set_session_listener(
        &self,
        session_id: SessionId,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "set_session_listener") {
            return status;
        }
        match state.sessions.get_mut(&session_id) {
            Some(slot) => {
                *slot = listener;
                NativeStatus::OK
            }
            None => NativeStatus::BUS_NO_SESSION,
        }
    }

    fn session_fd(&self, session_id: SessionId) -> Result<i32, NativeStatus> {
        if self.state().sessions.contains_key(&session_id) {
            // Deterministic fake descriptor.
            Ok(3 + (session_id.get() % 1000) as i32)
        } else {
            Err(NativeStatus::BUS_NO_SESSION)
        }
    }

    fn peer_guid(&self, name: &str) -> Result<String, NativeStatus> {
        if name.is_empty() || name == self.unique_name {
            return Ok(format!("{:032x}", 0x1u128));
        }
        Err(NativeStatus::BUS_NO_PEER_GUID)
    }

    fn set_daemon_debug(&self, module: &str, level: u32) -> NativeStatus {
        self.state().daemon_debug.insert(module.to_string(), level);
        NativeStatus::OK
    }

    fn method_reply(&self, _call: &Message, reply: Reply) -> NativeStatus {
        self.state().replies.push(reply);
        NativeStatus::OK
    }

    fn emit_signal(
        &self,
        source_path: &str,
        destination: Option<&str>,
        session_id: SessionId,
        member: &Member,
        args: &[MsgArg],
        ttl: u16,
        flags: u8,
    ) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "emit_signal") {
            return status;
        }
        state.signals.push(EmittedSignal {
            source_path: source_path.to_string(),
            destination: destination.map(str::to_string),
            session_id,
            interface: member.interface.clone(),
            member: member.name.clone(),
            args: args.to_vec(),
            ttl,
            flags,
        });
        NativeStatus::OK
    }

    fn method_call(&self, call: &MethodCall) -> Result<Vec<MsgArg>, CallFailure> {
        let mut state = self.state();
        state.calls.push(call.clone());
        state.call_results.pop_front().unwrap_or(Ok(Vec::new()))
    }

    fn method_call_no_reply(&self, call: &MethodCall) -> NativeStatus {
        let mut state = self.state();
        if let Some(status) = Self::forced(&mut state, "method_call_no_reply") {
            return status;
        }
        state.calls.push(call.clone());
        NativeStatus::OK
    }

    fn get_property(
        &self,
        _destination: &str,
        _object_path: &str,
        interface: &str,
        property: &str,
        _session_id: SessionId,
    ) -> Result<MsgArg, CallFailure> {
        self.state()
            .remote_properties
            .get(&format!("{}.{}", interface, property))
            .map(|value| MsgArg::variant(value.clone()))
            .ok_or(CallFailure::Status(NativeStatus::BUS_NO_SUCH_PROPERTY))
    }

    fn set_property(
        &self,
        _destination: &str,
        _object_path: &str,
        interface: &str,
        property: &str,
        _session_id: SessionId,
        value: &MsgArg,
    ) -> Result<(), CallFailure> {
        let inner = match value {
            MsgArg::Variant(inner) => (**inner).clone(),
            other => other.clone(),
        };
        self.state()
            .remote_properties
            .insert(format!("{}.{}", interface, property), inner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingPort(Mutex<Vec<SessionPort>>);

    impl SessionPortListener for CountingPort {
        fn accept_session_joiner(&self, port: SessionPort, _joiner: &str, _opts: &SessionOpts) -> bool {
            self.0.lock().unwrap().push(port);
            true
        }

        fn session_joined(&self, _port: SessionPort, _session_id: SessionId, _joiner: &str) {}
    }

    #[test]
    fn test_bind_any_picks_first_dynamic_port() {
        let bus = LoopbackBus::new();
        let listener: Arc<dyn SessionPortListener> = Arc::new(CountingPort(Mutex::new(Vec::new())));

        let mut first = SessionPort::ANY;
        assert!(bus.bind_session_port(&mut first, &SessionOpts::default(), Arc::clone(&listener)).is_ok());
        let mut second = SessionPort::ANY;
        assert!(bus.bind_session_port(&mut second, &SessionOpts::default(), listener).is_ok());

        assert_eq!(first, SessionPort::new(42));
        assert_eq!(second, SessionPort::new(43));
    }

    #[test]
    fn test_forced_failure_is_one_shot() {
        let bus = LoopbackBus::new();
        bus.fail_next("start", NativeStatus::FAIL);
        assert_eq!(bus.start(), NativeStatus::FAIL);
        assert!(bus.start().is_ok());
    }

    #[test]
    fn test_simulate_join_requires_bound_port() {
        let bus = LoopbackBus::new();
        assert!(bus.simulate_join(SessionPort::new(7), ":1.2", &SessionOpts::default()).is_none());
    }
}
