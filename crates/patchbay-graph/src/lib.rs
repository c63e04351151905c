//! Port records and the classified graph mirror.
//!
//! Pure data, no I/O: the client crate feeds server events in and reads
//! queries out.
//!
//! ```
//! use patchbay_graph::{keys, properties, Category, Direction, Graph, PortInfo};
//!
//! let mut graph = Graph::new();
//! let props = properties! {
//!     keys::NODE_ID => "10",
//!     keys::PORT_DIRECTION => "out",
//!     keys::FORMAT_DSP => "8 bit raw midi",
//!     keys::PORT_PHYSICAL => "true",
//! };
//! graph.insert_port(PortInfo::from_properties(5, &props)).unwrap();
//!
//! let outputs = graph.ports(Category::PhysicalMidi, 10, Direction::Output);
//! assert_eq!(outputs[0].id, 5);
//! ```

pub mod error;
pub use error::{Error, Result};

mod properties;
pub use properties::{keys, Properties};

mod port;
pub use port::{Category, Direction, MediaKind, Origin, PortInfo};

mod graph;
pub use graph::{Graph, Node};
