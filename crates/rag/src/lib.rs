pub mod generate;
pub mod search;

pub use generate::GeminiGenerator;
pub use search::FileSearchClient;
