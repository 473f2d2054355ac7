pub mod location;
pub mod trip;
pub mod user;
pub mod zone;

pub use location::{GeoPoint, LocationSample};
pub use trip::{FinalUpdate, LiveUpdate, NewTrip, TripId, TripRecord, TripStatus, TripUpdate};
pub use user::{ProfileUpdate, UserProfile};
pub use zone::{UserTarget, Zone};
