mod constant;
mod out_collect;
mod test_tone;

pub use constant::ConstantSource;
pub use out_collect::{
    Mapping, MappingError, OutputCollector, COLLECTOR_ID, MAX_MAPPINGS, NEW_MAPPING,
    REMOVE_MAPPING,
};
pub use test_tone::TestToneGenerator;
