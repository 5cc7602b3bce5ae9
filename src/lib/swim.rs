//! SWIM memory access engine.
//!
//! Every state changing SWIM command is followed by polling `READ_STATUS`
//! until the probe reports idle. Memory reads are two-phase: `READ_MEM`
//! latches the window on the target, `READ_BUF` streams it back.

use std::convert::TryFrom;
use std::io::Write;

use crate::commands::{self, BusyStatus, Cdb};
use crate::constants::{swim, Mode};
use crate::error::Error;
use crate::stlink::STLink;
use crate::transport::{BulkPipe, DataPhase};

/// Raw SWIM commands on the probe. None of these poll.
impl<P: BulkPipe> STLink<P> {
    pub fn swim_enter(&mut self) -> Result<(), Error> {
        log::debug!("entering SWIM mode");
        self.swim_command(swim::ENTER)
    }

    pub fn swim_exit(&mut self) -> Result<(), Error> {
        log::debug!("exiting SWIM mode");
        self.swim_command(swim::EXIT)
    }

    pub fn swim_command(&mut self, sub: u8) -> Result<(), Error> {
        self.exchange(&Cdb::swim(sub), DataPhase::None)
    }

    pub fn swim_command_with_arg(&mut self, sub: u8, arg: u8) -> Result<(), Error> {
        self.exchange(&Cdb::swim_with_arg(sub, arg), DataPhase::None)
    }

    pub fn swim_status(&mut self) -> Result<BusyStatus, Error> {
        let mut buf = [0; 4];
        self.exchange(&Cdb::swim(swim::READ_STATUS), DataPhase::In(&mut buf))?;
        let status = BusyStatus::decode(&buf);
        log::trace!("busy = {:#04x}, count = {:#08x}", status.busy, status.counter);
        Ok(status)
    }

    /// Largest window a single read or write may cover.
    pub fn swim_buffer_size(&mut self) -> Result<u16, Error> {
        let mut buf = [0; 2];
        self.exchange(&Cdb::swim(swim::READ_BUF_SIZE), DataPhase::In(&mut buf))?;
        Ok(commands::decode_buffer_size(&buf))
    }

    pub fn swim_read_cap(&mut self) -> Result<[u8; 8], Error> {
        let mut buf = [0; 8];
        self.exchange(&Cdb::swim_with_arg(swim::READ_CAP, 0x01), DataPhase::In(&mut buf))?;
        Ok(buf)
    }

    pub fn swim_write_mem(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        log::debug!("writing at {:#08x} ({:#x})", address, data.len());
        let (cdb, rest) = Cdb::swim_write(address, data)?;
        let phase = if rest.is_empty() {
            DataPhase::None
        } else {
            DataPhase::Out(rest)
        };
        self.exchange(&cdb, phase)
    }

    pub fn swim_begin_read(&mut self, address: u32, len: u16) -> Result<(), Error> {
        log::debug!("initiating read at {:#08x} ({:#x})", address, len);
        self.exchange(&Cdb::swim_begin_read(address, len), DataPhase::None)
    }

    pub fn swim_read_buf(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        log::debug!("reading {:#x} bytes", buf.len());
        self.exchange(&Cdb::swim(swim::READ_BUF), DataPhase::In(buf))
    }

    /// Runs `work` inside a complete SWIM session: leave DFU if needed, enter,
    /// prologue, `work`, epilogue, exit.
    ///
    /// A failure aborts immediately and leaves the target as it is, unless
    /// `Config::epilogue_on_failure` is set; then epilogue and exit are
    /// attempted and the original error is returned.
    pub fn swim_session<R, F>(&mut self, profile: &TargetProfile, work: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Swim<'_, P>) -> Result<R, Error>,
    {
        let restore = self.config().epilogue_on_failure;
        self.leave_dfu_mode()?;
        let mut swim = Swim::new(self);
        swim.enter()?;

        let result = swim.prologue(&profile.prologue).and_then(|_| work(&mut swim));
        match result {
            Ok(value) => {
                swim.epilogue(&profile.epilogue)?;
                swim.exit()?;
                Ok(value)
            }
            Err(e) if restore => {
                log::error!("SWIM session failed: {}; restoring target", e);
                if let Err(cleanup) = swim.epilogue(&profile.epilogue) {
                    log::warn!("epilogue after failure: {}", cleanup);
                }
                if let Err(cleanup) = swim.exit() {
                    log::warn!("exit after failure: {}", cleanup);
                }
                Err(e)
            }
            Err(e) => {
                log::error!("SWIM session aborted: {}", e);
                Err(e)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwimState {
    Disconnected,
    /// Probe is in SWIM mode, target not yet under debug control.
    Entered,
    /// Prologue done, memory may be accessed.
    Active,
    Exited,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepKind {
    Command(u8),
    CommandWithArg(u8, u8),
    WriteRegister { address: u32, value: u8 },
    ReadRegister { address: u32 },
    ReadCapabilities,
}

/// One entry of a prologue or epilogue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub kind: StepKind,
}

impl Step {
    pub const fn command(name: &'static str, sub: u8) -> Self {
        Step {
            name,
            kind: StepKind::Command(sub),
        }
    }

    pub const fn command_with_arg(name: &'static str, sub: u8, arg: u8) -> Self {
        Step {
            name,
            kind: StepKind::CommandWithArg(sub, arg),
        }
    }

    pub const fn write(name: &'static str, address: u32, value: u8) -> Self {
        Step {
            name,
            kind: StepKind::WriteRegister { address, value },
        }
    }

    pub const fn read(name: &'static str, address: u32) -> Self {
        Step {
            name,
            kind: StepKind::ReadRegister { address },
        }
    }

    pub const fn read_capabilities(name: &'static str) -> Self {
        Step {
            name,
            kind: StepKind::ReadCapabilities,
        }
    }
}

/// The sequences a target chip needs around memory access.
#[derive(Clone, Debug)]
pub struct TargetProfile {
    pub name: &'static str,
    pub prologue: Vec<Step>,
    pub epilogue: Vec<Step>,
}

impl Default for TargetProfile {
    fn default() -> Self {
        crate::stm8::profile()
    }
}

pub struct Swim<'a, P> {
    stlink: &'a mut STLink<P>,
    state: SwimState,
    transfer_size: Option<u16>,
}

impl<'a, P: BulkPipe> Swim<'a, P> {
    pub fn new(stlink: &'a mut STLink<P>) -> Self {
        Self {
            stlink,
            state: SwimState::Disconnected,
            transfer_size: None,
        }
    }

    pub fn state(&self) -> SwimState {
        self.state
    }

    fn expect_state(&self, allowed: &[SwimState]) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(self.state))
        }
    }

    /// Switches the probe into SWIM mode and checks that it arrived there.
    pub fn enter(&mut self) -> Result<(), Error> {
        self.expect_state(&[SwimState::Disconnected, SwimState::Exited])?;
        self.stlink.swim_enter()?;
        let mode = self.stlink.get_current_mode()?;
        if mode != Mode::LowPinDebug {
            return Err(Error::UnexpectedMode {
                expected: Mode::LowPinDebug,
                actual: mode,
            });
        }
        self.state = SwimState::Entered;
        Ok(())
    }

    pub fn prologue(&mut self, steps: &[Step]) -> Result<(), Error> {
        self.expect_state(&[SwimState::Entered])?;
        self.run_sequence(steps)?;
        self.state = SwimState::Active;
        Ok(())
    }

    pub fn epilogue(&mut self, steps: &[Step]) -> Result<(), Error> {
        self.expect_state(&[SwimState::Entered, SwimState::Active])?;
        self.state = SwimState::Entered;
        self.run_sequence(steps)
    }

    pub fn exit(&mut self) -> Result<(), Error> {
        self.expect_state(&[SwimState::Entered, SwimState::Active])?;
        self.stlink.swim_exit()?;
        self.state = SwimState::Exited;
        Ok(())
    }

    /// Executes `steps` in order, waiting for idle after each one.
    pub fn run_sequence(&mut self, steps: &[Step]) -> Result<(), Error> {
        for (index, step) in steps.iter().enumerate() {
            log::debug!("step {}: {}", index, step.name);
            if let Err(e) = self.run_step(step) {
                log::error!("step {} ({}) failed: {}", index, step.name, e);
                return Err(Error::Sequence {
                    step: index,
                    name: step.name,
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    fn run_step(&mut self, step: &Step) -> Result<(), Error> {
        match step.kind {
            StepKind::Command(sub) => self.settle(|stlink| stlink.swim_command(sub)),
            StepKind::CommandWithArg(sub, arg) => {
                self.settle(|stlink| stlink.swim_command_with_arg(sub, arg))
            }
            StepKind::WriteRegister { address, value } => {
                self.settle(|stlink| stlink.swim_write_mem(address, &[value]))
            }
            StepKind::ReadRegister { address } => {
                let mut value = [0];
                self.read_window(address, &mut value)?;
                log::debug!("{} @ {:#08x} = {:#04x}", step.name, address, value[0]);
                Ok(())
            }
            StepKind::ReadCapabilities => {
                let caps = self.settle(|stlink| stlink.swim_read_cap())?;
                log::debug!("{}: {:02X?}", step.name, caps);
                Ok(())
            }
        }
    }

    /// Issues `operation` and then polls until the probe is idle.
    pub fn settle<R, F>(&mut self, operation: F) -> Result<R, Error>
    where
        F: FnOnce(&mut STLink<P>) -> Result<R, Error>,
    {
        self.settle_until(operation, BusyStatus::is_idle)
    }

    /// Issues `operation` and then polls until `done` holds for the status.
    pub fn settle_until<R, F, D>(&mut self, operation: F, done: D) -> Result<R, Error>
    where
        F: FnOnce(&mut STLink<P>) -> Result<R, Error>,
        D: Fn(&BusyStatus) -> bool,
    {
        let value = operation(&mut *self.stlink)?;
        self.poll_until(done)?;
        Ok(value)
    }

    pub fn wait_idle(&mut self) -> Result<BusyStatus, Error> {
        self.poll_until(BusyStatus::is_idle)
    }

    /// Polls back to back, without delay.
    pub fn poll_until<D>(&mut self, done: D) -> Result<BusyStatus, Error>
    where
        D: Fn(&BusyStatus) -> bool,
    {
        let limit = self.stlink.config().poll_limit;
        let mut polls = 0u32;
        loop {
            if let Some(limit) = limit {
                if polls >= limit {
                    return Err(Error::BusyTimeout { polls });
                }
            }
            let status = self.stlink.swim_status()?;
            polls += 1;
            if done(&status) {
                log::trace!("idle after {} polls, count = {:#08x}", polls, status.counter);
                return Ok(status);
            }
        }
    }

    /// The chunk size for range transfers, queried from the probe once.
    pub fn transfer_size(&mut self) -> Result<u16, Error> {
        if let Some(size) = self.transfer_size {
            return Ok(size);
        }
        let size = self.stlink.swim_buffer_size()?;
        log::debug!("transfer size = {:#x}", size);
        if size == 0 {
            return Err(Error::ZeroTransferSize);
        }
        self.transfer_size = Some(size);
        Ok(size)
    }

    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.expect_state(&[SwimState::Active])?;
        if data.len() > u16::MAX as usize {
            return Err(Error::WindowTooLarge(data.len()));
        }
        self.settle(|stlink| stlink.swim_write_mem(address, data))
    }

    pub fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.expect_state(&[SwimState::Active])?;
        self.read_window(address, buf)
    }

    fn read_window(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let len = u16::try_from(buf.len()).map_err(|_| Error::WindowTooLarge(buf.len()))?;
        self.settle(|stlink| stlink.swim_begin_read(address, len))?;
        self.stlink.swim_read_buf(buf)
    }

    /// Reads `len` bytes starting at `address` into `sink`, one transfer-size
    /// chunk at a time, in address order.
    pub fn read_range<W: Write>(&mut self, address: u32, len: u32, sink: &mut W) -> Result<(), Error> {
        self.expect_state(&[SwimState::Active])?;
        let chunk = u32::from(self.transfer_size()?);
        let mut buf = vec![0; chunk as usize];
        let mut offset = 0;
        while offset < len {
            let n = (len - offset).min(chunk) as usize;
            self.read_window(address.wrapping_add(offset), &mut buf[..n])?;
            sink.write_all(&buf[..n])?;
            offset += n as u32;
        }
        Ok(())
    }

    pub fn write_range(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.expect_state(&[SwimState::Active])?;
        let chunk = usize::from(self.transfer_size()?);
        for (index, block) in data.chunks(chunk).enumerate() {
            let at = address.wrapping_add((index * chunk) as u32);
            self.settle(|stlink| stlink.swim_write_mem(at, block))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constants::commands::SWIM_COMMAND;
    use crate::error::{DeviceError, TransportError};
    use crate::mock::MockProbe;

    /// Out of DFU, where SWIM entry is accepted.
    fn probe(mut mock: MockProbe) -> STLink<MockProbe> {
        if mock.mode() == Mode::Bootloader as u8 {
            mock.set_mode(Mode::MassStorage);
        }
        STLink::new(mock, MockProbe::EP_OUT, MockProbe::EP_IN, Config::default())
    }

    /// SWIM sub-opcodes in the order the mock received them.
    fn swim_trace(stlink: &STLink<MockProbe>) -> Vec<u8> {
        stlink
            .transport()
            .pipe()
            .commands()
            .iter()
            .filter(|cbw| cbw.command()[0] == SWIM_COMMAND)
            .map(|cbw| cbw.command()[1])
            .collect()
    }

    fn active(stlink: &mut STLink<MockProbe>) -> Swim<'_, MockProbe> {
        let mut swim = Swim::new(stlink);
        swim.enter().unwrap();
        swim.prologue(&[]).unwrap();
        swim
    }

    #[test]
    fn busy_poll_stops_exactly_at_idle() {
        let mut mock = MockProbe::new();
        mock.set_busy_polls(3);
        let mut stlink = probe(mock);
        let mut swim = active(&mut stlink);
        swim.settle(|stlink| stlink.swim_command(swim::GEN_RST)).unwrap();
        let trace = swim_trace(&stlink);
        let after = trace.iter().rposition(|&sub| sub == swim::GEN_RST).unwrap();
        assert_eq!(&trace[after + 1..], &[swim::READ_STATUS; 4]);
    }

    #[test]
    fn poll_limit_bounds_a_stuck_device() {
        let mut mock = MockProbe::new();
        mock.set_mode(Mode::MassStorage);
        mock.set_busy_polls(100);
        let mut stlink = STLink::new(
            mock,
            MockProbe::EP_OUT,
            MockProbe::EP_IN,
            Config::default().with_poll_limit(Some(10)),
        );
        let mut swim = active(&mut stlink);
        let result = swim.settle(|stlink| stlink.swim_command(swim::GEN_RST));
        assert!(matches!(result, Err(Error::BusyTimeout { polls: 10 })));
    }

    #[test]
    fn busy_poll_aborts_on_transport_error() {
        let mut mock = MockProbe::new();
        mock.set_busy_polls(2);
        let mut stlink = probe(mock);
        let mut swim = active(&mut stlink);
        swim.stlink.swim_command(swim::GEN_RST).unwrap();
        swim.stlink.transport_mut().pipe_mut().time_out_next();
        assert!(matches!(
            swim.wait_idle(),
            Err(Error::Transport(TransportError::Timeout))
        ));
    }

    #[test]
    fn enter_requires_swim_mode() {
        let mut mock = MockProbe::new();
        mock.refuse_mode_changes();
        let mut stlink = probe(mock);
        let mut swim = Swim::new(&mut stlink);
        assert!(matches!(swim.enter(), Err(Error::UnexpectedMode { .. })));
        assert_eq!(swim.state(), SwimState::Disconnected);
    }

    #[test]
    fn memory_access_needs_the_prologue() {
        let mut stlink = probe(MockProbe::new());
        let mut swim = Swim::new(&mut stlink);
        swim.enter().unwrap();
        assert!(matches!(
            swim.read_memory(0x8000, &mut [0; 4]),
            Err(Error::InvalidState(SwimState::Entered))
        ));
    }

    #[test]
    fn prologue_runs_in_order_with_polls() {
        let mut stlink = probe(MockProbe::new());
        let mut swim = Swim::new(&mut stlink);
        swim.enter().unwrap();
        swim.prologue(&crate::stm8::prologue()).unwrap();
        assert_eq!(swim.state(), SwimState::Active);
        let trace = swim_trace(&stlink);
        assert_eq!(
            trace,
            vec![
                swim::ENTER,
                swim::ASSERT_RESET,
                swim::READ_STATUS,
                swim::ENTER_SEQ,
                swim::READ_STATUS,
                swim::WRITE_MEM,
                swim::READ_STATUS,
                swim::GEN_RST,
                swim::READ_STATUS,
                swim::WRITE_MEM,
                swim::READ_STATUS,
                swim::SPEED,
                swim::READ_STATUS,
                swim::WRITE_MEM,
                swim::READ_STATUS,
                swim::DEASSERT_RESET,
                swim::READ_STATUS,
                swim::READ_MEM,
                swim::READ_STATUS,
                swim::READ_BUF,
                swim::READ_CAP,
                swim::READ_STATUS,
            ]
        );
        let written = stlink.transport().pipe().memory_at(crate::stm8::SWIM_CSR, 1);
        assert_eq!(
            written,
            vec![crate::stm8::swim_csr::SAFE_MASK | crate::stm8::swim_csr::SWIM_DM | crate::stm8::swim_csr::HS]
        );
    }

    #[test]
    fn failing_step_aborts_the_prologue() {
        let mut mock = MockProbe::new();
        mock.fail_swim_command(swim::GEN_RST);
        let mut stlink = probe(mock);
        let mut swim = Swim::new(&mut stlink);
        swim.enter().unwrap();
        match swim.prologue(&crate::stm8::prologue()) {
            Err(Error::Sequence { step: 3, name, source }) => {
                assert_eq!(name, "generate reset");
                assert!(matches!(
                    *source,
                    Error::Device(DeviceError::CommandFailed { .. })
                ));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(swim.state(), SwimState::Entered);
        let trace = swim_trace(&stlink);
        assert_eq!(trace.last(), Some(&swim::GEN_RST));
    }

    #[test]
    fn chunked_read_covers_the_range_exactly() {
        let mut mock = MockProbe::new();
        mock.set_transfer_size(0x100);
        let mut stlink = probe(mock);
        let mut dump = Vec::new();
        {
            let mut swim = active(&mut stlink);
            swim.read_range(0x8000, 0x8000, &mut dump).unwrap();
        }
        let reads = stlink.transport().pipe().reads();
        assert_eq!(reads.len(), 128);
        assert!(reads.iter().all(|&(_, len)| len == 0x100));
        assert_eq!(reads.first(), Some(&(0x8000, 0x100)));
        assert_eq!(reads.last(), Some(&(0xff00, 0x100)));
        assert_eq!(dump.len(), 0x8000);
        assert_eq!(dump, stlink.transport().pipe().memory_at(0x8000, 0x8000));
    }

    #[test]
    fn chunked_read_truncates_the_last_chunk() {
        let mut mock = MockProbe::new();
        mock.set_transfer_size(0x100);
        let mut stlink = probe(mock);
        let mut dump = Vec::new();
        {
            let mut swim = active(&mut stlink);
            swim.read_range(0x4000, 1800, &mut dump).unwrap();
        }
        let reads = stlink.transport().pipe().reads();
        assert_eq!(reads.len(), 8);
        assert!(reads[..7].iter().all(|&(_, len)| len == 0x100));
        assert_eq!(reads[7], (0x4000 + 7 * 0x100, 1800 - 7 * 256));
        assert_eq!(dump.len(), 1800);
    }

    #[test]
    fn zero_transfer_size_is_rejected() {
        let mut mock = MockProbe::new();
        mock.set_transfer_size(0);
        let mut stlink = probe(mock);
        let mut swim = active(&mut stlink);
        assert!(matches!(
            swim.read_range(0x8000, 16, &mut Vec::new()),
            Err(Error::ZeroTransferSize)
        ));
    }

    #[test]
    fn failed_chunk_aborts_the_read() {
        let mut mock = MockProbe::new();
        mock.set_transfer_size(0x10);
        mock.fail_swim_command_after(swim::READ_BUF, 2);
        let mut stlink = probe(mock);
        let mut dump = Vec::new();
        let mut swim = active(&mut stlink);
        assert!(swim.read_range(0x8000, 0x40, &mut dump).is_err());
        // the first two chunks reached the sink before the failure
        assert_eq!(dump.len(), 0x20);
    }

    #[test]
    fn write_streams_bytes_past_the_inline_eight() {
        let mut stlink = probe(MockProbe::new());
        let data: Vec<u8> = (0..40).collect();
        {
            let mut swim = active(&mut stlink);
            swim.write_memory(0x1000, &data).unwrap();
        }
        let mock = stlink.transport().pipe();
        let cbw = mock
            .commands()
            .iter()
            .find(|cbw| cbw.command()[..2] == [SWIM_COMMAND, swim::WRITE_MEM])
            .unwrap()
            .clone();
        assert_eq!(cbw.transfer_length, 32);
        assert_eq!(&cbw.command()[8..16], &data[..8]);
        assert_eq!(mock.memory_at(0x1000, 40), data);
    }

    #[test]
    fn chunked_write_splits_on_transfer_size() {
        let mut mock = MockProbe::new();
        mock.set_transfer_size(0x10);
        let mut stlink = probe(mock);
        let data: Vec<u8> = (0..0x28).map(|b| b as u8 ^ 0x5a).collect();
        {
            let mut swim = active(&mut stlink);
            swim.write_range(0x0100, &data).unwrap();
        }
        let mock = stlink.transport().pipe();
        let windows: Vec<(u32, usize)> = mock.writes().iter().map(|(a, d)| (*a, d.len())).collect();
        assert_eq!(windows, vec![(0x100, 0x10), (0x110, 0x10), (0x120, 0x08)]);
        assert_eq!(mock.memory_at(0x100, 0x28), data);
    }

    #[test]
    fn session_runs_epilogue_and_exit() {
        let mut mock = MockProbe::new();
        mock.set_mode(Mode::MassStorage);
        let mut stlink = probe(mock);
        let mut value = [0u8; 2];
        stlink
            .swim_session(&TargetProfile::default(), |swim| swim.read_memory(0x8000, &mut value))
            .unwrap();
        let trace = swim_trace(&stlink);
        assert_eq!(trace.last(), Some(&swim::EXIT));
        assert_eq!(stlink.transport().pipe().memory_at(crate::stm8::DM_CSR2, 1), vec![0]);
    }

    #[test]
    fn session_leaves_dfu_before_entering_swim() {
        let mut stlink = STLink::new(MockProbe::new(), MockProbe::EP_OUT, MockProbe::EP_IN, Config::default());
        stlink.swim_session(&TargetProfile { name: "bare", prologue: vec![], epilogue: vec![] }, |_| Ok(())).unwrap();
        let opcodes: Vec<(u8, u8)> = stlink
            .transport()
            .pipe()
            .commands()
            .iter()
            .map(|cbw| (cbw.command()[0], cbw.command()[1]))
            .collect();
        assert_eq!(
            opcodes,
            vec![(0xf5, 0x00), (0xf3, 0x07), (0xf5, 0x00), (0xf4, swim::ENTER), (0xf5, 0x00), (0xf4, swim::EXIT)]
        );
    }

    #[test]
    fn session_failure_skips_epilogue_by_default() {
        let mut mock = MockProbe::new();
        mock.set_mode(Mode::MassStorage);
        mock.fail_swim_command(swim::READ_BUF_SIZE);
        let mut stlink = probe(mock);
        let result = stlink.swim_session(&TargetProfile::default(), |swim| {
            swim.read_range(0x8000, 0x10, &mut Vec::new())
        });
        assert!(result.is_err());
        assert_eq!(swim_trace(&stlink).last(), Some(&swim::READ_BUF_SIZE));
        // target left stalled
        assert_eq!(
            stlink.transport().pipe().memory_at(crate::stm8::DM_CSR2, 1),
            vec![crate::stm8::dm_csr2::STALL]
        );
    }

    #[test]
    fn session_failure_restores_target_when_configured() {
        let mut mock = MockProbe::new();
        mock.set_mode(Mode::MassStorage);
        mock.fail_swim_command(swim::READ_BUF_SIZE);
        let mut stlink = STLink::new(
            mock,
            MockProbe::EP_OUT,
            MockProbe::EP_IN,
            Config::default().with_epilogue_on_failure(true),
        );
        let result = stlink.swim_session(&TargetProfile::default(), |swim| {
            swim.read_range(0x8000, 0x10, &mut Vec::new())
        });
        assert!(matches!(
            result,
            Err(Error::Device(DeviceError::CommandFailed { .. }))
        ));
        assert_eq!(swim_trace(&stlink).last(), Some(&swim::EXIT));
        assert_eq!(stlink.transport().pipe().memory_at(crate::stm8::DM_CSR2, 1), vec![0]);
    }
}
