mod aggregator;
mod chat;
mod image;

pub use aggregator::ChatRoomAggregator;
pub use chat::ChatService;
pub use image::ImageService;
