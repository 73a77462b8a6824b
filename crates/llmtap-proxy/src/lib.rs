pub mod forward;
pub mod store;
pub mod viewer;

pub use forward::{router, run_proxy, ProxyConfig, ProxyState};
pub use store::CaptureStore;
pub use viewer::{run_viewer, viewer_router, ViewerState};
