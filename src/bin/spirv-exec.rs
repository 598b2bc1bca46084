//! Command-line front end: loads a SPIR-V binary and a JSON dispatch
//! description, runs the dispatch, and optionally dumps touched buffers.
//!
//! Dispatch description schema:
//!
//! ```json
//! {
//!   "entry_point": "main",
//!   "num_groups": [64, 1, 1],
//!   "spec_constants": {"0": 3},
//!   "buffers": [
//!     {"set": 0, "binding": 0, "input_file": "a.bin"},
//!     {"set": 0, "binding": 1, "size": 1024}
//!   ]
//! }
//! ```
//!
//! Each `buffers` entry is allocated in the device's global memory, loaded
//! from `input_file` if given (zero-filled up to `size` otherwise), and
//! bound to its `(set, binding)` slot before the dispatch runs.
use std::collections::HashMap as StdHashMap;
use std::fs;
use std::process;
use std::sync::Arc;

use serde::Deserialize;
use spirv_emu::device::Device;
use spirv_emu::dim3::Dim3;
use spirv_emu::dispatch::{DispatchCommand, DispatchExecutor};
use spirv_emu::module::Module;
use spirv_emu::object::Object;
use spirv_emu::parse::SpirvBinary;
use spirv_emu::stage::PipelineStage;
use spirv_emu::ty::Type;

#[derive(Deserialize)]
struct BufferSpec {
    set: u32,
    binding: u32,
    #[serde(default)]
    input_file: Option<String>,
    #[serde(default)]
    size: Option<usize>,
}

#[derive(Deserialize)]
struct DispatchDesc {
    #[serde(default = "default_entry_point")]
    entry_point: String,
    num_groups: [u32; 3],
    #[serde(default)]
    spec_constants: StdHashMap<String, u32>,
    #[serde(default)]
    buffers: Vec<BufferSpec>,
}

fn default_entry_point() -> String { "main".to_string() }

fn usage() -> ! {
    eprintln!("usage: spirv-exec <shader.spv> <dispatch.json> [--dump]");
    process::exit(2);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage();
    }
    let dump = args.iter().any(|a| a == "--dump");
    let (spv_path, json_path) = (&args[1], &args[2]);

    let spv_bytes = fs::read(spv_path).unwrap_or_else(|e| {
        eprintln!("error: reading '{}': {}", spv_path, e);
        process::exit(1);
    });
    let json_text = fs::read_to_string(json_path).unwrap_or_else(|e| {
        eprintln!("error: reading '{}': {}", json_path, e);
        process::exit(1);
    });
    let desc: DispatchDesc = serde_json::from_str(&json_text).unwrap_or_else(|e| {
        eprintln!("error: parsing dispatch description: {}", e);
        process::exit(1);
    });

    let binary = SpirvBinary::from(spv_bytes.as_slice());
    let module = Arc::new(Module::from_binary(&binary).unwrap_or_else(|e| {
        eprintln!("error: loading module: {}", e);
        process::exit(1);
    }));

    let device = Device::new();

    let overrides: StdHashMap<u32, Object> = desc
        .spec_constants
        .iter()
        .map(|(k, v)| {
            let spec_id: u32 = k.parse().unwrap_or_else(|_| {
                eprintln!("error: spec constant key '{}' is not a u32", k);
                process::exit(1);
            });
            let mut obj = Object::new_zeroed(Type::int(4, false));
            obj.set::<u32>(0, *v);
            (spec_id, obj)
        })
        .collect();

    let stage = PipelineStage::new(
        &device,
        module,
        &desc.entry_point,
        spirv_headers::ExecutionModel::GLCompute,
        &overrides,
    )
    .unwrap_or_else(|e| {
        eprintln!("error: specializing entry point '{}': {}", desc.entry_point, e);
        process::exit(1);
    });

    let num_groups = Dim3::new(desc.num_groups[0], desc.num_groups[1], desc.num_groups[2]);
    let mut cmd = DispatchCommand::new(Arc::new(stage), num_groups);

    for buf in &desc.buffers {
        let bytes = match &buf.input_file {
            Some(path) => fs::read(path).unwrap_or_else(|e| {
                eprintln!("error: reading buffer file '{}': {}", path, e);
                process::exit(1);
            }),
            None => vec![0u8; buf.size.unwrap_or(0)],
        };
        let addr = device.global_memory().allocate_zeroed(bytes.len());
        device.global_memory().store(addr, bytes.len(), &bytes);
        cmd.bind(buf.set, buf.binding, addr);
    }

    DispatchExecutor::run(&device, &cmd);

    if dump {
        print!("{}", device.global_memory().dump());
    }

    if device.error_count() > 0 {
        process::exit(1);
    }
}
