pub mod carrier;
pub mod device;
pub mod district;
pub mod market;

pub use carrier::*;
pub use device::*;
pub use district::*;
pub use market::*;
