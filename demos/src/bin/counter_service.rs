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
    load_json5, CapabilityBuilder, EventEmitter, OperationConfig, Service, ServiceConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// An event goes out whenever the total crosses a multiple of this.
const EVENT_EVERY: u64 = 100;

/// Counter service talking over the configured brokers
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the service's json5 configuration
    #[arg(short, long, value_name = "FILE", default_value = "demos/service-config.json5")]
    config: String,
}

#[derive(Deserialize)]
struct Increment {
    by: u64,
}

#[derive(Serialize)]
struct Count {
    total: u64,
}

#[derive(Serialize)]
struct CounterStatus {
    total: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let args = Args::parse();
    let config: ServiceConfig = load_json5(Path::new(&args.config))?;

    let total = Arc::new(AtomicU64::new(0));
    // The emitter only exists once the service is built, but the handler
    // below is registered before that.
    let emitter: Arc<OnceLock<EventEmitter>> = Arc::new(OnceLock::new());

    let handler_total = total.clone();
    let handler_emitter = emitter.clone();
    let counter = CapabilityBuilder::new("Counter")
        .operation(
            "increment",
            OperationConfig::default(),
            move |request: Increment| {
                let before = handler_total.fetch_add(request.by, Ordering::SeqCst);
                let after = before + request.by;
                if before / EVENT_EVERY != after / EVENT_EVERY {
                    if let Some(emitter) = handler_emitter.get() {
                        let _ = emitter.emit(
                            "Counter",
                            "threshold-crossed",
                            json!({ "total": after }),
                        );
                    }
                }
                Ok(Count { total: after })
            },
        )?
        .status({
            let total = total.clone();
            move || CounterStatus {
                total: total.load(Ordering::SeqCst),
            }
        })?
        .declare_event("threshold-crossed")
        .build();

    let service = Service::new(config, vec![counter], Vec::new())?;
    let _ = emitter.set(service.event_emitter());

    service.startup().await?;
    println!(
        "counter service listening as {}",
        service.hierarchy().dotted()
    );
    println!("press Ctrl-C to stop");

    tokio::select! {
        _ = service.run_until_unrecoverable() => {
            println!("a broker connection is gone for good, stopping");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("stopping on operator request");
        }
    }
    service.shutdown("operator stop").await;
    Ok(())
}
