//! Media analysis: upload client and the screen state that presents results.

mod client;
mod screen;

pub use client::{
    validate_image, AnalysisClient, AnalysisError, AnalysisResponse, AUDIO_FIELD,
    AUDIO_FILE_NAME, AUDIO_MIME, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, ENDPOINT_ENV, IMAGE_FIELD,
    IMAGE_FILE_NAME, IMAGE_MIME,
};
pub use screen::{Alert, AnalysisScreen, Phase, ScreenModel};
