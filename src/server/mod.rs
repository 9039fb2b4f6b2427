pub mod builder;
pub mod demo;
pub mod handler;
pub mod listener;

pub use builder::ServerBuilder;
pub use demo::DemoServer;
pub use handler::RequestHandler;
