/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use clap::Parser;
use consort_runtime::{
    load_json5, Client, ClientConfig, ClientDirective, ContentType, DataHandler, DirectRequest,
    Hierarchy, MessageCallback, RequestOutcome,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// One-shot client for the counter service
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the client's json5 configuration
    #[arg(short, long, value_name = "FILE", default_value = "demos/client-config.json5")]
    config: String,

    /// Dotted address of the counter service
    #[arg(short, long, default_value = "acme.plant-one.conveyor.-.counter")]
    service: String,

    /// Amount to add to the counter
    #[arg(short, long, default_value_t = 1)]
    by: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let args = Args::parse();
    let config: ClientConfig = load_json5(Path::new(&args.config))?;
    let destination = Hierarchy::parse_dotted(&args.service)?;

    let request = DirectRequest {
        destination,
        operation: "Counter.increment".to_string(),
        payload: json!({ "by": args.by }),
        content_type: ContentType::Json,
        data_handler: DataHandler::Message,
    };

    let on_reply: MessageCallback = Arc::new(|outcome: &RequestOutcome| {
        if outcome.has_error {
            println!("{} failed: {}", outcome.operation, outcome.payload);
        } else {
            println!("{} answered: {}", outcome.operation, outcome.payload);
        }
        ClientDirective::Terminate
    });

    let client = Client::new(config, vec![request], on_reply, None, Vec::new())?;
    client.startup().await?;
    client.run_until_terminated().await;
    Ok(())
}
