pub mod list;
pub mod sign;
pub mod timestamp;
pub mod unsign;
pub mod verify;
pub mod version;

pub use list::List;
pub use sign::Sign;
pub use timestamp::Timestamp;
pub use unsign::Unsign;
pub use verify::Verify;
pub use version::Version;
