//! Staged direct-charge firmware - main entry point
//!
//! Hardware-only entry point for STM32G473CB. Wires the PD/PPS sink
//! controller and both charge pumps onto the shared power I2C bus, arms the
//! IWDG, and spawns the control loop, keepalive, and report-drain tasks.

#![no_std]
#![no_main]

use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_stm32::exti::{Channel, ExtiInput};
use embassy_stm32::gpio::{AnyPin, Input, Pull};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;

use charge::staging::BrandId;
use firmware::tasks::control::{Command, CommandInbox, ControlLoop, FaultInbox, ReportQueue};
use platform::husb238a::Husb238a;
use platform::sc8551::Sc8551;
use platform::{ChargerType, Watchdog};

use defmt_rtt as _;
use panic_probe as _;

bind_interrupts!(struct Irqs {
    I2C1_EV => i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

/// IWDG timeout. The keepalive task pets at half this interval; a stalled
/// executor resets the MCU and drops the charge path with it.
const WATCHDOG_TIMEOUT_MS: u64 = 8_000;
/// Same timeout in the microsecond unit the IWDG constructor takes.
const WATCHDOG_TIMEOUT_US: u32 = 8_000_000;

/// Secondary SC8551 address (ADDR pin strapped high).
const SC8551_SECONDARY_ADDR: u8 = 0x67;

/// Battery brand for this build. The board ships with one qualified pack;
/// a multi-supplier product reads this from the fuel-gauge glue instead.
const BOARD_BRAND: BrandId = BrandId(1);

// All three power devices share I2C1 behind an async mutex.
type PowerI2c = I2c<'static, peripherals::I2C1, peripherals::DMA1_CH1, peripherals::DMA1_CH2>;
type PowerBusDevice = I2cDevice<'static, NoopRawMutex, PowerI2c>;

static I2C_BUS: StaticCell<Mutex<NoopRawMutex, PowerI2c>> = StaticCell::new();
static FAULTS: FaultInbox = FaultInbox::new();
static COMMANDS: CommandInbox = CommandInbox::new();
static REPORTS: ReportQueue = ReportQueue::new();

/// IWDG behind the platform keepalive capability.
struct IwdgWatchdog {
    inner: IndependentWatchdog<'static, peripherals::IWDG>,
}

impl Watchdog for IwdgWatchdog {
    fn pet(&mut self) {
        self.inner.pet();
    }

    fn timeout_ms(&self) -> u64 {
        WATCHDOG_TIMEOUT_MS
    }
}

#[embassy_executor::task]
async fn control_task(
    mut ctl: ControlLoop<'static, Husb238a<PowerBusDevice>, Sc8551<PowerBusDevice>>,
) {
    ctl.run().await
}

#[embassy_executor::task]
async fn keepalive_task(mut wdg: IwdgWatchdog) {
    firmware::keepalive(&mut wdg).await
}

#[embassy_executor::task]
async fn report_task() {
    loop {
        let report = REPORTS.receive().await;
        defmt::warn!("fault report: {} on {}", report.kind, report.converter);
    }
}

/// Hold here on unrecoverable bring-up failures; the IWDG is already armed
/// and unfed, so the MCU resets shortly after.
async fn park() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    defmt::info!("stagecharge firmware v{=str}", "0.1.0");
    let p = embassy_stm32::init(Default::default());

    // IWDG first: once unleashed it cannot be stopped, so every later
    // bring-up failure ends in a reset rather than a silent hang.
    let mut watchdog = IndependentWatchdog::new(p.IWDG, WATCHDOG_TIMEOUT_US);
    watchdog.unleash();
    defmt::info!("IWDG armed: timeout={=u64}ms", WATCHDOG_TIMEOUT_MS);

    // Power I2C bus: HUSB238A (0x08), SC8551 primary (0x66), secondary (0x67).
    // PB8 = I2C1_SCL, PB9 = I2C1_SDA, 400 kHz.
    let i2c = I2c::new(
        p.I2C1,
        p.PB8,
        p.PB9,
        Irqs,
        p.DMA1_CH1,
        p.DMA1_CH2,
        Hertz(400_000),
        Default::default(),
    );
    let bus = I2C_BUS.init(Mutex::new(i2c));

    let adapter = Husb238a::new(I2cDevice::new(bus));
    let mut primary = Sc8551::new(I2cDevice::new(bus));
    let mut secondary = Sc8551::with_address(I2cDevice::new(bus), SC8551_SECONDARY_ADDR);

    if primary.init().await.is_err() {
        defmt::error!("primary converter init failed");
        park().await;
    }
    if secondary.init().await.is_err() {
        defmt::error!("secondary converter init failed");
        park().await;
    }
    defmt::info!("converters initialized, power stages off");

    let staging = match firmware::profile::default_staging() {
        Ok(staging) => staging,
        Err(e) => {
            defmt::error!("staging profile rejected: {}", e);
            park().await;
        }
    };

    let ctl = ControlLoop::new(
        adapter,
        primary,
        Some(secondary),
        staging,
        &FAULTS,
        &COMMANDS,
        &REPORTS,
    );
    spawner.must_spawn(control_task(ctl));
    spawner.must_spawn(keepalive_task(IwdgWatchdog { inner: watchdog }));
    spawner.must_spawn(report_task());
    defmt::info!("control loop running");

    // PA0 = HUSB238A nINT/attach, open-drain active low. The PD controller
    // pulls it low while a source is attached; edges drive session start and
    // teardown. Insertion classification beyond "PD source present" happens
    // in the control loop's detect stage.
    let mut attach: ExtiInput<'static, AnyPin> =
        ExtiInput::new(Input::new(p.PA0, Pull::Up).degrade(), p.EXTI0.degrade());

    loop {
        attach.wait_for_falling_edge().await;
        defmt::info!("adapter attached");
        let _ = COMMANDS.try_send(Command::Start {
            charger: ChargerType::Direct,
            brand: BOARD_BRAND,
        });

        attach.wait_for_rising_edge().await;
        defmt::info!("adapter removed");
        let _ = COMMANDS.try_send(Command::AdapterRemoved);
    }
}
