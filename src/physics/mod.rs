mod body_control_state;
pub use self::body_control_state::*;

mod body_flags;
pub use self::body_flags::*;

mod collision_recording;
pub use self::collision_recording::*;

mod contact_listener;
pub use self::contact_listener::*;

mod error;
pub use self::error::*;

mod handles;
pub use self::handles::*;

mod ignore_list;
pub use self::ignore_list::*;

mod physical_world;
pub use self::physical_world::*;

mod physics_body;
pub use self::physics_body::*;

mod settings;
pub use self::settings::*;

mod tracked_constraint;
pub use self::tracked_constraint::*;

mod user_data;
pub use self::user_data::*;
