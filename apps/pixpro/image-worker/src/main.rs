//! Image Worker Service - Entry Point
//!
//! Background worker that processes image transformation jobs from the
//! partitioned RabbitMQ queues.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    pixpro_image_worker::run().await
}
