//! Service Control Manager adapter built on `windows-service`.
use std::{
    ffi::OsString,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use tracing::{error, info};
use windows_service::{
    define_windows_service,
    service::{
        ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
        ServiceType,
    },
    service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle},
    service_dispatcher,
};

use super::{
    AcceptedControls, ControlBridge, ControlCode, ControlOutcome, ManagerState, RELOAD_CONTROL,
    StatusRecord, StatusReporter,
};
use crate::{error::ServiceError, lifecycle::Lifecycle};

// The dispatcher entry point is a bare function pointer; it finds its bridge here.
static BRIDGE: OnceLock<Arc<ControlBridge<Lifecycle>>> = OnceLock::new();
// Filled by `service_main` and taken by `run` once the dispatcher returns.
static OUTCOME: Mutex<Option<Result<(), ServiceError>>> = Mutex::new(None);

define_windows_service!(ffi_service_main, service_main);

struct ScmReporter {
    service: String,
    handle: ServiceStatusHandle,
}

impl StatusReporter for ScmReporter {
    fn report(&self, status: &StatusRecord) -> Result<(), ServiceError> {
        self.handle
            .set_service_status(to_service_status(status))
            .map_err(|err| ServiceError::StatusReport {
                service: self.service.clone(),
                reason: err.to_string(),
            })
    }
}

fn to_service_status(status: &StatusRecord) -> ServiceStatus {
    let current_state = match status.state {
        ManagerState::StartPending => ServiceState::StartPending,
        ManagerState::Running => ServiceState::Running,
        ManagerState::Paused => ServiceState::Paused,
        ManagerState::StopPending => ServiceState::StopPending,
        ManagerState::Stopped => ServiceState::Stopped,
    };

    let mut controls_accepted = ServiceControlAccept::empty();
    if status.controls.contains(AcceptedControls::STOP) {
        controls_accepted |= ServiceControlAccept::STOP;
    }
    if status.controls.contains(AcceptedControls::SHUTDOWN) {
        controls_accepted |= ServiceControlAccept::SHUTDOWN;
    }
    if status.controls.contains(AcceptedControls::PAUSE_CONTINUE) {
        controls_accepted |= ServiceControlAccept::PAUSE_CONTINUE;
    }

    ServiceStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state,
        controls_accepted,
        exit_code: ServiceExitCode::Win32(status.exit_code),
        checkpoint: status.checkpoint,
        wait_hint: status.wait_hint,
        process_id: None,
    }
}

fn to_control_code(control: ServiceControl) -> ControlCode {
    match control {
        ServiceControl::Stop => ControlCode::Stop,
        ServiceControl::Shutdown => ControlCode::Shutdown,
        ServiceControl::Pause => ControlCode::Pause,
        ServiceControl::Continue => ControlCode::Continue,
        ServiceControl::Interrogate => ControlCode::Interrogate,
        ServiceControl::UserEvent(code) if code.to_raw() == RELOAD_CONTROL => ControlCode::Reload,
        ServiceControl::UserEvent(code) => ControlCode::Other(code.to_raw()),
        _ => ControlCode::Other(0),
    }
}

fn service_main(_arguments: Vec<OsString>) {
    let Some(bridge) = BRIDGE.get().cloned() else {
        return;
    };

    let outcome = serve_registered(&bridge);
    if let Err(err) = &outcome {
        error!(service = %bridge.name(), "service exited with error: {err}");
    }
    record_outcome(outcome);
}

fn serve_registered(bridge: &Arc<ControlBridge<Lifecycle>>) -> Result<(), ServiceError> {
    let handler_bridge = Arc::clone(bridge);
    let handle = service_control_handler::register(bridge.name(), move |control| {
        match handler_bridge.handle_control(to_control_code(control)) {
            ControlOutcome::Handled => ServiceControlHandlerResult::NoError,
            ControlOutcome::NotImplemented => ServiceControlHandlerResult::NotImplemented,
        }
    })
    .map_err(|err| ServiceError::Registration {
        service: bridge.name().to_string(),
        reason: format!("control handler: {err}"),
    })?;

    bridge.attach(Box::new(ScmReporter {
        service: bridge.name().to_string(),
        handle,
    }));

    bridge.serve()
}

fn record_outcome(outcome: Result<(), ServiceError>) {
    *OUTCOME.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
}

fn take_outcome(service: &str) -> Result<(), ServiceError> {
    OUTCOME
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or_else(|| {
            Err(ServiceError::Registration {
                service: service.to_string(),
                reason: "the dispatcher returned without running the service".into(),
            })
        })
}

/// Hands the current thread to the Service Control Manager dispatcher. Returns once the
/// service has reported `Stopped`.
pub fn run(lifecycle: Arc<Lifecycle>) -> Result<(), ServiceError> {
    let name = lifecycle.name().to_string();
    let bridge = Arc::new(ControlBridge::new(name.clone(), lifecycle));
    if BRIDGE.set(bridge).is_err() {
        return Err(ServiceError::AlreadyStarted { service: name });
    }

    info!(service = %name, "connecting to the service control manager");
    service_dispatcher::start(&name, ffi_service_main).map_err(|err| {
        ServiceError::Registration {
            service: name.clone(),
            reason: err.to_string(),
        }
    })?;

    take_outcome(&name)
}
