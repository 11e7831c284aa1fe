pub mod candle;
pub mod hub;

pub use self::candle::{CandleEngine, CandlePipeline};
pub use hub::{ModelFiles, ModelStore};
