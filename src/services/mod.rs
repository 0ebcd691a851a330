pub mod launcher;
pub mod manager;
pub mod process_tree;
pub mod progress;
pub mod registry;
pub mod results;
pub mod system;
pub mod uploads;

pub use manager::JobManager;
pub use registry::JobRegistry;
pub use system::SystemMonitor;
pub use uploads::UploadStore;
