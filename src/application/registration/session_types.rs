use super::errors::ProvisioningError;

/// Registration session states.
///
/// `Ready` is both the initial state and where the session returns after a
/// terminal outcome. `Error` is transient: the next `poll()` reports the
/// failure through the error callback and goes back to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Ready,
    /// Waiting to issue the register request.
    RegisterSend,
    /// Register request issued; waiting for the service.
    RegisterSent,
    /// Waiting (throttled) to issue an operation-status request.
    StatusSend,
    /// Status request issued; waiting for the service.
    StatusSent,
    Error,
}

/// Progress reported to the caller's status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Connection to the provisioning service is up.
    Connected,
    /// The service accepted the request and has not yet picked an endpoint.
    Registering,
    /// The service is assigning the device.
    Assigning,
}

/// Where the service placed the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    pub assigned_endpoint: String,
    pub device_id: String,
}

/// Inputs to the session transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Register,
    RequestIssued,
    /// The transport reported progress; ask for the operation status.
    StatusPending,
    Fail,
    Completed,
    Recovered,
}

/// Called once with the assignment when registration succeeds.
pub type CompletionCallback = Box<dyn FnOnce(DeviceAssignment)>;
/// Called on every status change of the registration in flight.
pub type StatusCallback = Box<dyn FnMut(RegistrationStatus)>;
/// Called once per failed registration attempt.
pub type ErrorCallback = Box<dyn FnMut(ProvisioningError)>;
