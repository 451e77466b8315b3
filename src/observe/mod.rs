mod coordinator;
mod poller;
mod request;

pub use coordinator::{
    CoordinatorSettings, ObservationCoordinator, ObservationHandle, ObservationReceipt,
};
pub use poller::{ObservatoryStatus, PollerSettings, StatusPoller};
pub use request::{Filter, MAX_LABEL_LEN, ObservationRequest, estimate_duration};
