use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub amqp_url: String,
    pub exchange: String,
    pub customer_service: String,
    pub shopping_service: String,
    pub http_addr: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let user = std::env::var("RABBITMQ_USER").context("RABBITMQ_USER is required")?;
        let password = std::env::var("RABBITMQ_PASSWORD").context("RABBITMQ_PASSWORD is required")?;
        let host = std::env::var("RABBITMQ_SERVICE").context("RABBITMQ_SERVICE is required")?;
        let exchange = std::env::var("EXCHANGE_NAME").context("EXCHANGE_NAME is required")?;
        let customer_service =
            std::env::var("CUSTOMER_SERVICE").unwrap_or_else(|_| "customer_service".to_string());
        let shopping_service =
            std::env::var("SHOPPING_SERVICE").unwrap_or_else(|_| "shopping_service".to_string());
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        Ok(Self {
            amqp_url: format!("amqp://{user}:{password}@{host}"),
            exchange,
            customer_service,
            shopping_service,
            http_addr,
        })
    }
}
