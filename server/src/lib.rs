//! MJPEG streaming server over a latest-wins frame buffer.
//!
//! Every `/stream` connection runs its own loop: wait for a frame, write one
//! multipart part as one chunk, sleep for the live frame interval, repeat
//! until the client leaves or the server stops.

pub mod control;
pub mod multipart;
pub mod pages;
mod routes;
pub mod server;
mod stream;

pub use server::{MjpegStreamServer, ServerError, ServerHandle};
