pub mod column;
pub mod dataset;
pub mod error;
pub mod event;
pub mod messages;
pub mod registry;
pub mod relation;
pub mod row;
pub mod schema;
pub mod transport;
pub mod validation;
pub mod value;

pub use column::Column;
pub use dataset::{Dataset, DatasetMut, SaveRequest, SchemaData, SearchRequest};
pub use error::{Result, RowsetError};
pub use event::{CollectionAction, Event, EventKind, JsonMap};
pub use registry::Registry;
pub use relation::Relation;
pub use row::{Row, RowId, RowState};
pub use schema::{parse_dictionary, parse_dictionary_str, Dictionary};
pub use transport::{MemoryTransport, Transport, TransportError};
pub use value::{Decimal, Value};
