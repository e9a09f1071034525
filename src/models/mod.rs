pub mod analysis;
pub mod chat;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod presence;

pub use analysis::*;
pub use chat::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use presence::*;
