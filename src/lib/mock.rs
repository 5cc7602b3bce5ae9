//! A simulated ST-Link V1 on the bulk pipe level, for tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::constants::{commands, swim, Mode, Status, CSW_SIGNATURE};
use crate::envelope::{CommandEnvelope, StatusEnvelope};
use crate::transport::BulkPipe;

enum Pending {
    Command,
    /// A write command waiting for the bytes past the inlined eight.
    WriteData {
        tag: u32,
        address: u32,
        data: Vec<u8>,
        expected: usize,
        status: Status,
    },
}

pub struct MockProbe {
    mode: u8,
    refuse_mode_changes: bool,
    memory: HashMap<u32, u8>,
    transfer_size: u16,
    busy_polls: u32,
    busy_remaining: u32,
    op_counter: u32,
    read_window: (u32, u16),

    pending: Pending,
    in_queue: VecDeque<Vec<u8>>,

    commands: Vec<CommandEnvelope>,
    statuses: Vec<StatusEnvelope>,
    reads: Vec<(u32, u16)>,
    writes: Vec<(u32, Vec<u8>)>,
    attempts: usize,
    cleared: Vec<u8>,

    stalls: usize,
    stall_after: usize,
    time_out_next: bool,
    short_next_data: Option<usize>,
    fail_next: Option<Status>,
    fail_sense: bool,
    skew_next_tag: bool,
    corrupt_next_signature: bool,
    corrupt_sense_signature: bool,
    failing_swim: HashMap<u8, usize>,
}

impl MockProbe {
    pub const EP_OUT: u8 = 0x02;
    pub const EP_IN: u8 = 0x81;
    pub const SENSE_KEY: u8 = 0x05;
    pub const SENSE_ASC: u8 = 0x20;
    pub const VERSION: [u8; 6] = [0x13, 0x47, 0x83, 0x04, 0x44, 0x37];

    /// A probe in DFU mode with a 0x100 byte transfer size that is never busy.
    pub fn new() -> Self {
        Self {
            mode: Mode::Bootloader as u8,
            refuse_mode_changes: false,
            memory: HashMap::new(),
            transfer_size: 0x100,
            busy_polls: 0,
            busy_remaining: 0,
            op_counter: 0,
            read_window: (0, 0),
            pending: Pending::Command,
            in_queue: VecDeque::new(),
            commands: Vec::new(),
            statuses: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            attempts: 0,
            cleared: Vec::new(),
            stalls: 0,
            stall_after: 0,
            time_out_next: false,
            short_next_data: None,
            fail_next: None,
            fail_sense: false,
            skew_next_tag: false,
            corrupt_next_signature: false,
            corrupt_sense_signature: false,
            failing_swim: HashMap::new(),
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode as u8;
    }

    pub fn set_raw_mode(&mut self, mode: u8) {
        self.mode = mode;
    }

    /// Mode changing commands pass but leave the mode untouched.
    pub fn refuse_mode_changes(&mut self) {
        self.refuse_mode_changes = true;
    }

    pub fn set_transfer_size(&mut self, size: u16) {
        self.transfer_size = size;
    }

    /// Number of busy status reads after each state changing command.
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    pub fn load(&mut self, address: u32, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.memory.insert(address.wrapping_add(offset as u32), *byte);
        }
    }

    /// Stall the next `count` transfer attempts.
    pub fn stall_next(&mut self, count: usize) {
        self.stall_after(0, count);
    }

    /// Let `passes` transfer attempts through, then stall the next `count`.
    pub fn stall_after(&mut self, passes: usize, count: usize) {
        self.stall_after = passes;
        self.stalls = count;
    }

    pub fn time_out_next(&mut self) {
        self.time_out_next = true;
    }

    /// Deliver only `len` bytes of the next inbound data phase.
    pub fn shorten_next_data(&mut self, len: usize) {
        self.short_next_data = Some(len);
    }

    pub fn fail_next(&mut self, status: Status) {
        self.fail_next = Some(status);
    }

    pub fn fail_sense(&mut self) {
        self.fail_sense = true;
    }

    pub fn skew_next_tag(&mut self) {
        self.skew_next_tag = true;
    }

    pub fn corrupt_next_signature(&mut self) {
        self.corrupt_next_signature = true;
    }

    /// The status envelope of the next REQUEST SENSE carries a bad signature.
    pub fn corrupt_sense_signature(&mut self) {
        self.corrupt_sense_signature = true;
    }

    /// Every occurrence of the SWIM sub-command fails.
    pub fn fail_swim_command(&mut self, sub: u8) {
        self.fail_swim_command_after(sub, 0);
    }

    /// The SWIM sub-command succeeds `successes` times, then fails.
    pub fn fail_swim_command_after(&mut self, sub: u8, successes: usize) {
        self.failing_swim.insert(sub, successes);
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn commands(&self) -> &[CommandEnvelope] {
        &self.commands
    }

    pub fn statuses(&self) -> &[StatusEnvelope] {
        &self.statuses
    }

    /// Windows latched by `READ_MEM`, in order.
    pub fn reads(&self) -> &[(u32, u16)] {
        &self.reads
    }

    pub fn writes(&self) -> &[(u32, Vec<u8>)] {
        &self.writes
    }

    pub fn transfer_attempts(&self) -> usize {
        self.attempts
    }

    pub fn halts_cleared(&self) -> usize {
        self.cleared.len()
    }

    /// Endpoints passed to `clear_halt`, in order.
    pub fn cleared_endpoints(&self) -> &[u8] {
        &self.cleared
    }

    /// Target memory; untouched bytes hold a pattern derived from the address.
    pub fn memory_at(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|offset| {
                let at = address.wrapping_add(offset);
                self.memory
                    .get(&at)
                    .copied()
                    .unwrap_or((at ^ (at >> 8)) as u8)
            })
            .collect()
    }

    fn fault(&mut self) -> rusb::Result<()> {
        self.attempts += 1;
        if self.stalls > 0 && self.stall_after > 0 {
            self.stall_after -= 1;
        } else if self.stalls > 0 {
            self.stalls -= 1;
            return Err(rusb::Error::Pipe);
        }
        if self.time_out_next {
            self.time_out_next = false;
            return Err(rusb::Error::Timeout);
        }
        Ok(())
    }

    fn busy(&mut self) {
        self.busy_remaining = self.busy_polls;
        self.op_counter = self.op_counter.wrapping_add(1) & 0x00ff_ffff;
    }

    fn queue_status(&mut self, tag: u32, status: Status) -> rusb::Result<()> {
        let mut csw = StatusEnvelope::new(tag, 0, status as u8);
        if self.skew_next_tag {
            self.skew_next_tag = false;
            csw.tag = tag.wrapping_add(1);
        }
        if self.corrupt_next_signature {
            self.corrupt_next_signature = false;
            csw.signature = !CSW_SIGNATURE;
        }
        let bytes = csw.encode().map_err(|_| rusb::Error::Other)?;
        self.statuses.push(csw);
        self.in_queue.push_back(bytes.to_vec());
        Ok(())
    }

    fn handle_command(&mut self, cbw: CommandEnvelope) -> rusb::Result<()> {
        let command = cbw.command().to_vec();
        let expected = cbw.transfer_length as usize;
        let forced = self.fail_next.take();
        self.commands.push(cbw.clone());

        let opcode = command.first().copied().unwrap_or(0);
        let (mut response, mut status) = match opcode {
            commands::GET_VERSION => (MockProbe::VERSION.to_vec(), Status::Passed),
            commands::GET_CURRENT_MODE => (vec![self.mode, 0], Status::Passed),
            commands::DFU_COMMAND if command.get(1) == Some(&commands::DFU_EXIT) => {
                if !self.refuse_mode_changes && self.mode == Mode::Bootloader as u8 {
                    self.mode = Mode::MassStorage as u8;
                }
                (vec![], Status::Passed)
            }
            commands::DEBUG_COMMAND => {
                if !self.refuse_mode_changes {
                    match command.get(1).copied() {
                        Some(commands::DEBUG_ENTER) => self.mode = Mode::Debug as u8,
                        Some(commands::DEBUG_EXIT) => self.mode = Mode::MassStorage as u8,
                        _ => {}
                    }
                }
                (vec![], Status::Passed)
            }
            commands::REQUEST_SENSE => {
                let mut sense = vec![0u8; commands::REQUEST_SENSE_LENGTH as usize];
                sense[0] = 0x70;
                sense[2] = MockProbe::SENSE_KEY;
                sense[12] = MockProbe::SENSE_ASC;
                let status = if self.fail_sense { Status::Failed } else { Status::Passed };
                if self.corrupt_sense_signature {
                    self.corrupt_sense_signature = false;
                    self.corrupt_next_signature = true;
                }
                (sense, status)
            }
            commands::SWIM_COMMAND => return self.handle_swim(cbw.tag, &command, expected, forced),
            _ => (vec![], Status::Failed),
        };

        if let Some(forced) = forced {
            status = forced;
        }
        response.resize(expected, 0);
        if let Some(len) = self.short_next_data.take() {
            response.truncate(len);
        }
        if !response.is_empty() {
            self.in_queue.push_back(response);
        }
        self.queue_status(cbw.tag, status)
    }

    fn handle_swim(&mut self, tag: u32, command: &[u8], expected: usize, forced: Option<Status>) -> rusb::Result<()> {
        let sub = command.get(1).copied().unwrap_or(0xff);
        let mut status = Status::Passed;
        if let Some(successes) = self.failing_swim.get_mut(&sub) {
            if *successes == 0 {
                status = Status::Failed;
            } else {
                *successes -= 1;
            }
        }
        if let Some(forced) = forced {
            status = forced;
        }

        let mut response = Vec::new();
        match sub {
            swim::ENTER => {
                // the bootloader ignores SWIM entry
                if !self.refuse_mode_changes && self.mode != Mode::Bootloader as u8 {
                    self.mode = Mode::LowPinDebug as u8;
                }
            }
            swim::EXIT => {
                if !self.refuse_mode_changes {
                    self.mode = Mode::MassStorage as u8;
                }
            }
            swim::READ_STATUS => {
                let busy = if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                    1
                } else {
                    0
                };
                response = (self.op_counter << 8 | busy).to_le_bytes().to_vec();
            }
            swim::READ_BUF_SIZE => response = self.transfer_size.to_le_bytes().to_vec(),
            swim::READ_CAP => response = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            swim::WRITE_MEM if command.len() >= 8 => {
                let len = u16::from_be_bytes([command[2], command[3]]) as usize;
                let address = u32::from_be_bytes([command[4], command[5], command[6], command[7]]);
                let inline = len.min(swim::WRITE_INLINE_LEN).min(command.len().saturating_sub(8));
                let data = command[8..8 + inline].to_vec();
                if expected > 0 {
                    self.pending = Pending::WriteData {
                        tag,
                        address,
                        data,
                        expected,
                        status,
                    };
                    return Ok(());
                }
                self.complete_write(address, data, status);
            }
            swim::READ_MEM if command.len() >= 8 => {
                let len = u16::from_be_bytes([command[2], command[3]]);
                let address = u32::from_be_bytes([command[4], command[5], command[6], command[7]]);
                if status == Status::Passed {
                    self.read_window = (address, len);
                    self.reads.push((address, len));
                }
                self.busy();
            }
            swim::READ_BUF => {
                let (address, len) = self.read_window;
                response = self.memory_at(address, (len as usize).min(expected));
            }
            _ => self.busy(),
        }

        if status != Status::Passed {
            response.clear();
        }
        response.resize(expected, 0);
        if let Some(len) = self.short_next_data.take() {
            response.truncate(len);
        }
        if !response.is_empty() {
            self.in_queue.push_back(response);
        }
        self.queue_status(tag, status)
    }

    fn complete_write(&mut self, address: u32, data: Vec<u8>, status: Status) {
        if status == Status::Passed {
            self.load(address, &data);
            self.writes.push((address, data));
        }
        self.busy();
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        MockProbe::new()
    }
}

impl BulkPipe for MockProbe {
    fn bulk_write(&mut self, _endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        self.fault()?;
        match std::mem::replace(&mut self.pending, Pending::Command) {
            Pending::Command => {
                let cbw = CommandEnvelope::decode(data).map_err(|_| rusb::Error::Io)?;
                self.handle_command(cbw)?;
            }
            Pending::WriteData {
                tag,
                address,
                data: mut collected,
                expected,
                status,
            } => {
                let take = data.len().min(expected);
                collected.extend_from_slice(&data[..take]);
                self.complete_write(address, collected, status);
                self.queue_status(tag, status)?;
            }
        }
        Ok(data.len())
    }

    fn bulk_read(&mut self, _endpoint: u8, data: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        self.fault()?;
        let chunk = self.in_queue.pop_front().ok_or(rusb::Error::Timeout)?;
        let len = chunk.len().min(data.len());
        data[..len].copy_from_slice(&chunk[..len]);
        Ok(len)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        self.cleared.push(endpoint);
        Ok(())
    }
}
