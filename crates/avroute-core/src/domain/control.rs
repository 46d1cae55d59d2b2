//! Contracts the routing engine consumes from device drivers.
//!
//! The engine never talks to hardware directly.  Device drivers register a
//! [`ControlHandle`] per control, declaring up front which capabilities it
//! has: a control can be a source, a destination, a switcher (midpoint), or
//! any combination.  The capability set is resolved once at registration and
//! looked up through the [`ControlRegistry`], so the engine never has to inspect
//! a control's concrete type at routing time.
//!
//! A switcher may complete a route synchronously (a local matrix answering
//! over serial) or asynchronously (a proxy for a switcher owned by another
//! core).  [`SwitchOutcome::Pending`] tells the engine to wait for
//! [`crate::RoutingGraph::pending_route_finished`].
//!
//! A switcher that can be changed from outside (a front panel, another
//! control system) reports it through the [`RouteChangedNotifier`] the
//! registry hands it once an observer is installed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::endpoint::{Address, ConnectionType, ConnectorInfo, DeviceControlInfo, EndpointInfo};
use super::operation::RouteOperation;

/// Result of asking a switcher to perform one hop of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The hop finished; `true` on success.
    Completed(bool),
    /// The hop was handed off and will be reported through
    /// `pending_route_finished` with the operation's id.
    Pending,
}

/// Receives the control whose crosspoints changed outside the engine.
pub type RouteChangedObserver = Arc<dyn Fn(DeviceControlInfo) + Send + Sync>;

/// Lets one switcher report crosspoint changes it did not get from the
/// engine.
#[derive(Clone)]
pub struct RouteChangedNotifier {
    control: DeviceControlInfo,
    observer: RouteChangedObserver,
}

impl RouteChangedNotifier {
    pub fn new(control: DeviceControlInfo, observer: RouteChangedObserver) -> Self {
        Self { control, observer }
    }

    pub fn control(&self) -> DeviceControlInfo {
        self.control
    }

    /// Reports a change.  The engine reads the switcher back before this
    /// returns, so the caller must not hold any of its own locks.
    pub fn notify(&self) {
        (self.observer)(self.control);
    }
}

impl std::fmt::Debug for RouteChangedNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteChangedNotifier")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

/// A control that can connect one of its inputs to one of its outputs.
///
/// The engine may call the query methods while it holds its connections
/// lock, so implementations must not call back into the engine from them.
#[cfg_attr(test, mockall::automock)]
pub trait SwitcherControl: Send + Sync {
    /// Routes `operation.local_input` to `operation.local_output`.
    fn route(&self, operation: &RouteOperation) -> SwitchOutcome;

    /// Disconnects whatever is routed to `output` for the given types.
    fn clear_output(&self, output: Address, connection_type: ConnectionType) -> bool;

    /// Inputs currently routed to `output`.
    fn get_inputs(&self, output: Address, connection_type: ConnectionType) -> Vec<ConnectorInfo>;

    /// Outputs currently fed by `input`.
    fn get_outputs(&self, input: Address, connection_type: ConnectionType) -> Vec<ConnectorInfo>;

    /// Whether a live signal is present on `input`.
    fn signal_detected(&self, input: Address, connection_type: ConnectionType) -> bool {
        let _ = (input, connection_type);
        true
    }

    /// Keeps `notifier` for reporting changes made outside the engine,
    /// replacing any earlier one.  Switchers that cannot see such changes
    /// drop it.
    fn subscribe(&self, notifier: RouteChangedNotifier) {
        let _ = notifier;
    }
}

/// A control that emits signals on its outputs.
pub trait SourceControl: Send + Sync {
    /// Output connectors and the types each carries.  An empty list declares
    /// nothing and leaves links from this control unchecked.
    fn outputs(&self) -> Vec<ConnectorInfo>;
}

/// A control that receives signals on its inputs.
pub trait DestinationControl: Send + Sync {
    /// Input connectors and the types each accepts.  An empty list declares
    /// nothing and leaves links into this control unchecked.
    fn inputs(&self) -> Vec<ConnectorInfo>;

    /// Whether a live signal is present on `input`.
    fn signal_detected(&self, input: Address, connection_type: ConnectionType) -> bool;
}

/// A registered control together with the capabilities it implements.
#[derive(Clone)]
pub struct ControlHandle {
    pub info: DeviceControlInfo,
    pub source: Option<Arc<dyn SourceControl>>,
    pub destination: Option<Arc<dyn DestinationControl>>,
    pub switcher: Option<Arc<dyn SwitcherControl>>,
}

impl ControlHandle {
    pub fn new(info: DeviceControlInfo) -> Self {
        Self {
            info,
            source: None,
            destination: None,
            switcher: None,
        }
    }

    pub fn with_source(mut self, control: Arc<dyn SourceControl>) -> Self {
        self.source = Some(control);
        self
    }

    pub fn with_destination(mut self, control: Arc<dyn DestinationControl>) -> Self {
        self.destination = Some(control);
        self
    }

    pub fn with_switcher(mut self, control: Arc<dyn SwitcherControl>) -> Self {
        self.switcher = Some(control);
        self
    }
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("info", &self.info)
            .field("source", &self.source.is_some())
            .field("destination", &self.destination.is_some())
            .field("switcher", &self.switcher.is_some())
            .finish()
    }
}

/// Resolves controls by `(device, control)`.
///
/// Shared between the routing engine (lookups on every route) and whoever
/// creates or retires controls at runtime, such as the remote-switcher
/// placeholders of the cost distribution protocol.
#[derive(Default)]
pub struct ControlRegistry {
    controls: RwLock<HashMap<DeviceControlInfo, ControlHandle>>,
    observer: RwLock<Option<RouteChangedObserver>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a control, subscribing the route observer to
    /// its switcher capability.
    pub fn register(&self, handle: ControlHandle) {
        let info = handle.info;
        let switcher = handle.switcher.clone();
        self.controls.write().insert(info, handle);
        if let Some(switcher) = switcher {
            self.subscribe(info, &switcher);
        }
    }

    /// Installs `observer` and subscribes it to every registered switcher.
    pub fn set_route_observer(&self, observer: RouteChangedObserver) {
        *self.observer.write() = Some(observer);
        self.resubscribe();
    }

    /// Hands every registered switcher a fresh notifier.
    pub fn resubscribe(&self) {
        if self.observer.read().is_none() {
            return;
        }
        let switchers: Vec<(DeviceControlInfo, Arc<dyn SwitcherControl>)> = self
            .controls
            .read()
            .iter()
            .filter_map(|(info, handle)| handle.switcher.clone().map(|s| (*info, s)))
            .collect();
        for (info, switcher) in switchers {
            self.subscribe(info, &switcher);
        }
    }

    fn subscribe(&self, info: DeviceControlInfo, switcher: &Arc<dyn SwitcherControl>) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            switcher.subscribe(RouteChangedNotifier::new(info, observer));
        }
    }

    /// Removes a control; returns `true` if it was registered.
    pub fn unregister(&self, info: DeviceControlInfo) -> bool {
        self.controls.write().remove(&info).is_some()
    }

    pub fn get(&self, info: DeviceControlInfo) -> Option<ControlHandle> {
        self.controls.read().get(&info).cloned()
    }

    pub fn switcher(&self, info: DeviceControlInfo) -> Option<Arc<dyn SwitcherControl>> {
        self.controls
            .read()
            .get(&info)
            .and_then(|handle| handle.switcher.clone())
    }

    pub fn is_switcher(&self, info: DeviceControlInfo) -> bool {
        self.controls
            .read()
            .get(&info)
            .is_some_and(|handle| handle.switcher.is_some())
    }

    /// Returns whether a live signal is present at `input` on `info`.
    ///
    /// Destination capability wins over switcher capability; controls that
    /// cannot report detection are treated as live.
    pub fn signal_detected(
        &self,
        info: DeviceControlInfo,
        input: Address,
        connection_type: ConnectionType,
    ) -> bool {
        let Some(handle) = self.get(info) else {
            return true;
        };
        if let Some(destination) = &handle.destination {
            return destination.signal_detected(input, connection_type);
        }
        if let Some(switcher) = &handle.switcher {
            return switcher.signal_detected(input, connection_type);
        }
        true
    }

    /// Types the source capability behind `endpoint` declares for that
    /// output, or `None` when there is nothing to check against.
    pub fn declared_output_types(&self, endpoint: EndpointInfo) -> Option<ConnectionType> {
        let handle = self.get(endpoint.device_control())?;
        let connectors = handle.source.as_ref()?.outputs();
        declared_types(&connectors, endpoint.address, handle.switcher.is_some())
    }

    /// Types the destination capability behind `endpoint` declares for that
    /// input, or `None` when there is nothing to check against.
    pub fn declared_input_types(&self, endpoint: EndpointInfo) -> Option<ConnectionType> {
        let handle = self.get(endpoint.device_control())?;
        let connectors = handle.destination.as_ref()?.inputs();
        declared_types(&connectors, endpoint.address, handle.switcher.is_some())
    }

    pub fn len(&self) -> usize {
        self.controls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.read().is_empty()
    }
}

/// Union of the types declared at `address`.
///
/// An address the list leaves out supports nothing, unless the control is
/// also a switcher and the port belongs to its matrix.
fn declared_types(
    connectors: &[ConnectorInfo],
    address: Address,
    switches: bool,
) -> Option<ConnectionType> {
    if connectors.is_empty() {
        return None;
    }
    let mut listed = false;
    let mut types = ConnectionType::NONE;
    for connector in connectors.iter().filter(|c| c.address == address) {
        listed = true;
        types |= connector.connection_type;
    }
    if !listed && switches {
        return None;
    }
    Some(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeadInput;

    impl DestinationControl for DeadInput {
        fn inputs(&self) -> Vec<ConnectorInfo> {
            vec![ConnectorInfo::new(1, ConnectionType::VIDEO)]
        }

        fn signal_detected(&self, _input: Address, _connection_type: ConnectionType) -> bool {
            false
        }
    }

    #[test]
    fn test_registered_switcher_is_resolved() {
        // Arrange
        let registry = ControlRegistry::new();
        let info = DeviceControlInfo::new(10, 0);
        let mut mock = MockSwitcherControl::new();
        mock.expect_route().returning(|_| SwitchOutcome::Completed(true));
        registry.register(ControlHandle::new(info).with_switcher(Arc::new(mock)));

        // Act
        let switcher = registry.switcher(info).expect("switcher must resolve");

        // Assert
        assert!(registry.is_switcher(info));
        let op = RouteOperation::new(
            crate::EndpointInfo::new(1, 0, 1),
            crate::EndpointInfo::new(2, 0, 1),
            ConnectionType::VIDEO,
            1,
        );
        assert_eq!(switcher.route(&op), SwitchOutcome::Completed(true));
    }

    #[test]
    fn test_unknown_control_is_not_a_switcher() {
        let registry = ControlRegistry::new();
        assert!(!registry.is_switcher(DeviceControlInfo::new(1, 0)));
        assert!(registry.switcher(DeviceControlInfo::new(1, 0)).is_none());
    }

    #[test]
    fn test_signal_detected_asks_destination_capability() {
        let registry = ControlRegistry::new();
        let info = DeviceControlInfo::new(4, 0);
        registry.register(ControlHandle::new(info).with_destination(Arc::new(DeadInput)));

        assert!(!registry.signal_detected(info, 1, ConnectionType::VIDEO));
        // Unregistered controls are assumed live.
        assert!(registry.signal_detected(DeviceControlInfo::new(5, 0), 1, ConnectionType::VIDEO));
    }

    struct VideoOut;

    impl SourceControl for VideoOut {
        fn outputs(&self) -> Vec<ConnectorInfo> {
            vec![ConnectorInfo::new(1, ConnectionType::VIDEO)]
        }
    }

    #[test]
    fn test_declared_types_follow_connector_list() {
        // Arrange
        let registry = ControlRegistry::new();
        registry.register(ControlHandle::new(DeviceControlInfo::new(1, 0)).with_source(Arc::new(VideoOut)));
        registry.register(
            ControlHandle::new(DeviceControlInfo::new(2, 0))
                .with_switcher(Arc::new(MockSwitcherControl::new()))
                .with_source(Arc::new(VideoOut)),
        );

        // Act / Assert
        assert_eq!(
            registry.declared_output_types(crate::EndpointInfo::new(1, 0, 1)),
            Some(ConnectionType::VIDEO)
        );
        assert_eq!(
            registry.declared_output_types(crate::EndpointInfo::new(1, 0, 2)),
            Some(ConnectionType::NONE),
            "a plain source has no such output"
        );
        assert_eq!(
            registry.declared_output_types(crate::EndpointInfo::new(2, 0, 2)),
            None,
            "matrix outputs are the switcher's"
        );
        assert_eq!(registry.declared_input_types(crate::EndpointInfo::new(1, 0, 1)), None);
    }

    #[test]
    fn test_switchers_get_notifier_once_observer_is_installed() {
        // Arrange
        let registry = ControlRegistry::new();
        let early = DeviceControlInfo::new(10, 0);
        let late = DeviceControlInfo::new(20, 0);
        let mut first = MockSwitcherControl::new();
        first.expect_subscribe().times(1).returning(|notifier| notifier.notify());
        registry.register(ControlHandle::new(early).with_switcher(Arc::new(first)));
        let heard = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&heard);

        // Act
        registry.set_route_observer(Arc::new(move |control| sink.lock().push(control)));
        let mut second = MockSwitcherControl::new();
        second.expect_subscribe().times(1).returning(|notifier| notifier.notify());
        registry.register(ControlHandle::new(late).with_switcher(Arc::new(second)));

        // Assert
        assert_eq!(*heard.lock(), vec![early, late]);
    }

    #[test]
    fn test_unregister_removes_control() {
        let registry = ControlRegistry::new();
        let info = DeviceControlInfo::new(4, 0);
        registry.register(ControlHandle::new(info));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(info));
        assert!(registry.is_empty());
        assert!(!registry.unregister(info));
    }
}
