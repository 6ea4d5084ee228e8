pub mod client;
pub mod protocol;
pub mod server;

pub use client::{send_batch, ClientOptions, RpcClient};
pub use server::{create_router, serve};
