mod pattern;
mod table;

pub use pattern::{PathPattern, Segment, REST_KEY};
pub use table::{HostPattern, Route, RouteLimit, RouteMatch, RouteTable};
