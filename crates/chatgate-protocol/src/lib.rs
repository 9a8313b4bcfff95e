pub mod openai;
pub mod sse;

pub use sse::{LineDecoder, data_payload, encode_data, DONE_LINE};
