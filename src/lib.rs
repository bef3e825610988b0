pub mod crystal;
pub mod geom;
pub mod io;
pub mod optics;
pub mod pool;
pub mod sim;

// Prelude
pub use crystal::Crystal;
pub use geom::rotation::AxisRotation;
pub use geom::vector::Vec3;
pub use pool::{RaySegHandle, RaySegment, RaySegmentPool};
pub use sim::config::ProjectContext;
pub use sim::simulator::Simulator;
