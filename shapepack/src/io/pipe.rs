//! Pipe marker traits for the async layer
// (c) 2025 Ross Younger

use tokio::io::{AsyncRead, AsyncWrite};

/// Marker trait for pipes that carry outbound data
pub trait SendingPipe: AsyncWrite + Send + Unpin {}
impl<T: AsyncWrite + Send + Unpin + ?Sized> SendingPipe for T {}

/// Marker trait for pipes that carry inbound data
pub trait ReceivingPipe: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin + ?Sized> ReceivingPipe for T {}
