pub mod email;
pub mod extractors;
pub mod image;
pub mod ocr;
pub mod regions;

pub use email::EmailParser;
pub use extractors::FieldExtractor;
pub use image::ImageProcessor;
pub use ocr::{RecognitionBackend, TextRecognizer};
pub use regions::RegionDetector;
