//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
//! Offloading handlers from an in-process event bus
//!
//! Run with `RUST_LOG=debug` to see every registration.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pulse_dispatch::{
    AdminOp, Component, Console, Controller, EventPriority, HandlerDescriptor, LocalEventBus,
    LogLevel, MemorySettings, Settings, execute, init_logging,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogLevel::Info)?;

    let bus = Arc::new(LocalEventBus::new());
    bus.add_component(
        Component::new("Shops")
            .with_handler(HandlerDescriptor::new("ChatEvent", EventPriority::High, || {
                println!("shops: chat handled on {:?}", thread::current().name());
                Ok(())
            }))
            .with_handler(HandlerDescriptor::new("TickEvent", EventPriority::Lowest, || {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })),
    );
    bus.add_component(Component::new("Quests").with_handler(
        HandlerDescriptor::new("ChatEvent", EventPriority::Normal, || Err("quest log unavailable".into()))
            .ignore_cancelled(true),
    ));

    let mut settings = Settings::default();
    settings.advanced.slow_task_threshold_ms = 100;
    settings.advanced.monitor_interval_secs = 1;

    let controller = Controller::new(bus.clone(), Arc::new(MemorySettings::new(settings)))
        .with_self_owner("Demo");
    let report = controller.start()?;
    println!("offloading {} handlers", report.handlers_registered);

    bus.fire("ChatEvent", false);
    bus.fire("ChatEvent", true);
    for _ in 0..4 {
        bus.fire("TickEvent", false);
    }

    println!("{}", execute(&controller, &Console, AdminOp::Exclude("TickEvent".into())));
    println!("{}", execute(&controller, &Console, AdminOp::ListExclusions));

    let shutdown = controller.shutdown();
    println!("shutdown clean: {}", shutdown.is_clean());
    println!("{:#?}", controller.metrics().snapshot());
    Ok(())
}
