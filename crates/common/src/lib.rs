// nbstore-common: path codec and wire types shared across the nbstore workspace

pub mod path;
pub mod types;
