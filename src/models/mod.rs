pub mod position;
pub mod volume;

pub use position::{LayoutColumn, NewPosition, Position, DEFAULT_CAPACITY_CLASS};
pub use volume::{
    check_hazard_fields, LabelKind, NewMotherLabel, NewVolume, Volume, VolumeCode, VolumeEvent,
    VolumeStatus, VolumeType,
};
