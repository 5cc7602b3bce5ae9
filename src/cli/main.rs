use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use stlink::{stm8, Config, STLink, STLinkUSBDevice, TagPolicy, TargetProfile, WireProtocol};
use structopt::StructOpt;

fn main() {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let config = opt.config();

    let context = match rusb::Context::new() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("USB init failed: {}", e);
            std::process::exit(1);
        }
    };

    let result = match opt.cmd {
        Cmd::List => list_connected_devices(&context),
        Cmd::Info { n } => with_probe(&context, n, config, show_info),
        Cmd::Connect { n, protocol } => with_probe(&context, n, config, |st_link| connect(st_link, protocol)),
        Cmd::Dump {
            n,
            address,
            length,
            output,
        } => {
            let address = address.unwrap_or(stm8::FLASH_START);
            let length = length.unwrap_or(stm8::STM8S105_FLASH_SIZE);
            with_probe(&context, n, config, |st_link| dump(st_link, address, length, output))
        }
        Cmd::Write { n, address, input } => {
            with_probe(&context, n, config, |st_link| write(st_link, address, input))
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn parse_hex_32(input: &str) -> Result<u32, std::num::ParseIntError> {
    if input.starts_with("0x") {
        u32::from_str_radix(&input[2..], 16)
    } else {
        input.parse::<u32>()
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "stlink-swim", about = "Talk to STM8 targets through an ST-Link V1")]
struct Opt {
    /// Fail when a status envelope echoes the wrong tag
    #[structopt(long)]
    strict_tags: bool,

    /// Timeout of a single bulk transfer in milliseconds
    #[structopt(long, default_value = "1000")]
    timeout_ms: u64,

    /// Restore the target even if a memory access failed
    #[structopt(long)]
    epilogue_on_failure: bool,

    #[structopt(subcommand)]
    cmd: Cmd,
}

impl Opt {
    fn config(&self) -> Config {
        let tag_policy = if self.strict_tags {
            TagPolicy::Strict
        } else {
            TagPolicy::Lenient
        };
        Config::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_tag_policy(tag_policy)
            .with_epilogue_on_failure(self.epilogue_on_failure)
    }
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// List all connected ST-Links
    List,
    /// Print version and mode of the selected ST-Link
    Info {
        /// The number associated with the ST-Link to use
        #[structopt(default_value = "0")]
        n: usize,
    },
    /// Switch the probe into SWD or SWIM mode
    Connect {
        #[structopt(short = "n", default_value = "0")]
        n: usize,
        #[structopt(default_value = "swim")]
        protocol: WireProtocol,
    },
    /// Dump target memory to a file
    Dump {
        #[structopt(short = "n", default_value = "0")]
        n: usize,
        /// Start address, the flash start if omitted
        #[structopt(short = "a", long = "address", parse(try_from_str = parse_hex_32))]
        address: Option<u32>,
        /// Number of bytes, the STM8S105 flash size if omitted
        #[structopt(short = "l", long = "length", parse(try_from_str = parse_hex_32))]
        length: Option<u32>,
        #[structopt(short = "o", long = "output", parse(from_os_str))]
        output: PathBuf,
    },
    /// Write a file into target memory
    Write {
        #[structopt(short = "n", default_value = "0")]
        n: usize,
        #[structopt(short = "a", long = "address", parse(try_from_str = parse_hex_32))]
        address: u32,
        #[structopt(short = "i", long = "input", parse(from_os_str))]
        input: PathBuf,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn list_connected_devices(context: &rusb::Context) -> CliResult<()> {
    let connected_stlinks = stlink::get_all_plugged_devices(context)?;
    println!("The following devices were found:");
    connected_stlinks.iter().enumerate().for_each(|(num, link)| {
        println!(
            "[{}]: PID = {:#06x}, version = {}",
            num, link.info.usb_pid, link.info.version_name
        );
    });
    Ok(())
}

/// Opens ST-Link number `n`, runs `f` on it and releases the interface again.
fn with_probe<F>(context: &rusb::Context, n: usize, config: Config, f: F) -> CliResult<()>
where
    F: FnOnce(&mut STLink<STLinkUSBDevice>) -> CliResult<()>,
{
    let mut devices = stlink::get_all_plugged_devices(context)?;
    if n >= devices.len() {
        return Err(format!("no ST-Link with number {} ({} found)", n, devices.len()).into());
    }
    let mut usb_device = devices.remove(n);
    usb_device.open()?;
    let mut st_link = STLink::open(usb_device, config)?;
    let result = f(&mut st_link);
    finish(result, st_link.close())
}

/// The operation's own error wins over a failure to release the probe.
fn finish(result: CliResult<()>, closed: Result<(), stlink::Error>) -> CliResult<()> {
    if let Err(e) = &closed {
        log::warn!("closing ST-Link failed: {}", e);
    }
    result.and(closed.map_err(Into::into))
}

fn show_info(st_link: &mut STLink<STLinkUSBDevice>) -> CliResult<()> {
    let version = st_link.get_version()?;
    println!(
        "ST-Link v{}, JTAG v{}, SWIM v{}, VID {:#06x}, PID {:#06x}",
        version.stlink, version.jtag, version.swim, version.vendor_id, version.product_id
    );
    let mode = st_link.get_current_mode()?;
    println!("mode = {:?}", mode);
    Ok(())
}

fn connect(st_link: &mut STLink<STLinkUSBDevice>, protocol: WireProtocol) -> CliResult<()> {
    let mode = st_link.connect(protocol.mode())?;
    println!("probe is in {:?} mode", mode);
    Ok(())
}

fn dump(st_link: &mut STLink<STLinkUSBDevice>, address: u32, length: u32, output: PathBuf) -> CliResult<()> {
    let mut sink = BufWriter::new(File::create(&output)?);
    st_link.swim_session(&TargetProfile::default(), |swim| swim.read_range(address, length, &mut sink))?;
    sink.flush()?;
    println!("dumped {:#x} bytes from {:#08x} to {}", length, address, output.display());
    Ok(())
}

fn write(st_link: &mut STLink<STLinkUSBDevice>, address: u32, input: PathBuf) -> CliResult<()> {
    let mut data = Vec::new();
    File::open(&input)?.read_to_end(&mut data)?;

    st_link.swim_session(&TargetProfile::default(), |swim| swim.write_range(address, &data))?;
    println!("wrote {:#x} bytes to {:#08x}", data.len(), address);
    Ok(())
}
