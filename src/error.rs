use thiserror::Error;

/// Errors raised while building or finalizing a design.
///
/// Every variant aborts the whole trace. Messages name the offending entity and,
/// when known, where it was declared.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("pin resolution failed on {archetype}: {reason}")]
    PinResolution { archetype: String, reason: String },

    #[error("pin {pin} is already connected to net {existing}, can't connect it to {requested}{}", at(.provenance))]
    DoubleBinding {
        pin: String,
        existing: String,
        requested: String,
        provenance: Option<String>,
    },

    #[error("can't determine which pin of {component} to connect to {net}: {reason}{}", at(.provenance))]
    UnresolvableEndpoint {
        component: String,
        net: String,
        reason: String,
        provenance: Option<String>,
    },

    #[error("more than one net is called {name}{}", at(.provenance))]
    DuplicateNetName {
        name: String,
        provenance: Option<String>,
    },

    #[error("more than one component has the designator {designator}{}", at(.provenance))]
    DuplicateDesignator {
        designator: String,
        provenance: Option<String>,
    },

    #[error("malformed connection to {target}: {reason}{}", at(.provenance))]
    MalformedConnection {
        target: String,
        reason: String,
        provenance: Option<String>,
    },

    #[error("unknown archetype {0}")]
    UnknownArchetype(String),

    #[error("invalid archetype {name}: {reason}")]
    InvalidArchetype { name: String, reason: String },

    #[error("{component} has no pin named {pin}")]
    UnknownPin { component: String, pin: String },

    #[error("malformed designator history {path} line {line}: {reason}")]
    History {
        path: String,
        line: u64,
        reason: String,
    },

    #[error("designator history: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn at(provenance: &Option<String>) -> String {
    match provenance {
        Some(label) => format!(" (defined at {})", label),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, DesignError>;
