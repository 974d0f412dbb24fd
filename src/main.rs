#![allow(clippy::redundant_clone)]

use esp_idf_hal::mutex::Mutex;
use esp_idf_hal::peripherals::Peripherals;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentherm_gateway::config::{CoordinatorConfig, LinkConfig, Mode};
use opentherm_gateway::coordinator::{Coordinator, Direction, Source};
use opentherm_gateway::hal::{self, PortHal};
use opentherm_gateway::port::{Port, Role};

const TICK_INTERVAL: Duration = Duration::from_millis(1);
const INTERCEPT_RATE: u32 = 10;

fn main() -> anyhow::Result<()> {
    // Temporary. Will disappear once ESP-IDF 4.4 is released, but for now it is necessary to call this function once,
    // or else some patches to the runtime implemented by esp-idf-sys might not link properly.
    esp_idf_sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    let boot_time: Instant = Instant::now();

    // GPIO setup ****************************
    let peripherals = Peripherals::take().expect("Problem aquiring Peripherals::take()");

    // Thermostat-facing link: this gateway plays boiler to the thermostat.
    let thermostat_tx = peripherals.pins.gpio4.into_output()?;
    let thermostat_rx = peripherals.pins.gpio5.into_input()?;
    let thermostat_rx_num = 5;

    // Boiler-facing link: this gateway plays thermostat to the boiler.
    let boiler_tx = peripherals.pins.gpio18.into_output()?;
    let boiler_rx = peripherals.pins.gpio19.into_input()?;
    let boiler_rx_num = 19;

    let thermostat_link = LinkConfig {
        invert_tx: false,
        invert_rx: false,
    };
    let boiler_link = LinkConfig {
        invert_tx: false,
        invert_rx: false,
    };

    let mut thermostat_hal = PortHal::new(thermostat_tx, thermostat_rx, thermostat_rx_num, thermostat_link)?;
    let mut boiler_hal = PortHal::new(boiler_tx, boiler_rx, boiler_rx_num, boiler_link)?;
    hal::activate_both(&mut thermostat_hal, &mut boiler_hal);

    let mut thermostat_port = Port::new(Role::SlaveFacing);
    let mut boiler_port = Port::new(Role::MasterFacing);

    let coordinator = Arc::new(Mutex::new(Coordinator::new(CoordinatorConfig {
        mode: Mode::Proxy,
        intercept_rate: INTERCEPT_RATE,
    })));
    {
        let mut guard = coordinator.lock();
        guard.set_message_callback(|direction: Direction, source: Source, bits: u32| {
            log::info!("{:?} {:?} {:08x}", direction, source, bits);
        });
    }

    println!("opentherm-gateway starting, mode=Proxy intercept_rate={INTERCEPT_RATE}");

    // Ports themselves live on the main thread; only the coordinator is
    // shared, since a future HTTP/MQTT handler (out of scope here, see
    // spec.md Non-goals) would also need `coordinator.status()` and
    // `coordinator.submit_manual_write`.
    loop {
        thermostat_hal.service(&mut thermostat_port);
        boiler_hal.service(&mut boiler_port);

        let now_ms = Instant::now().duration_since(boot_time).as_millis() as i64;
        coordinator
            .lock()
            .tick(&mut thermostat_port, &mut boiler_port, now_ms);

        std::thread::sleep(TICK_INTERVAL);
    }
}
