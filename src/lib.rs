pub mod archetype;
pub mod cli;
pub mod component;
pub mod config;
pub mod design;
pub mod error;
pub mod net;
pub mod output;
pub mod parser;
pub mod pin;
pub mod provenance;
pub mod refdes;
pub mod session;
pub mod trace;

// Re-export commonly used types
pub use archetype::{ArchetypeBuilder, ArchetypeRegistry, ComponentTypeId, PinSelector};
pub use component::{ComponentId, ComponentInstance, ComponentSpec, Designator, PinRef};
pub use config::EngineConfig;
pub use design::{Connection, ConnectTarget, DesignContext, FinalizedDesign};
pub use error::{DesignError, Result};
pub use net::{ConnectDirection, Endpoint, Net, NetId, PinRole};
pub use parser::TraceParser;
pub use pin::{PinSpec, PinType};
pub use provenance::Provenance;
pub use refdes::{AnchorRecord, Anchors, RefdesHistory};
pub use session::Session;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
