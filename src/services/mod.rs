pub mod canvas;
pub mod captions;
pub mod fitting;
pub mod generation;
pub mod images;
pub mod pipeline;
pub mod projector;
pub mod runner;
pub mod storage;
pub mod validation;
