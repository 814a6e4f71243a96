use std::time::Duration;

use dsp_network::{
    backend::CpalBackend,
    built_in_modules::{Mapping, TestToneGenerator},
    DspNetwork, Item, MessageBuffer, ModuleId, NetworkConfig,
};

const TONE_SECONDS: u64 = 2;

fn main() {
    env_logger::init();

    let device_name = std::env::args().nth(1);

    let (network, handle) = DspNetwork::new(NetworkConfig::default());
    let _stream = match network.start(&CpalBackend::new(), device_name.as_deref()) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("could not open output device # {}", e);
            std::process::exit(1);
        }
    };

    let tone = ModuleId::new("tone").unwrap();
    handle.add_item(Item::new(tone, TestToneGenerator::new(440.0, -18.0)));
    handle.add_mapping(Mapping::new(tone, 0, 0));
    handle.add_mapping(Mapping::new(tone, 1, 1));

    std::thread::sleep(Duration::from_secs(TONE_SECONDS));

    let mut msg = MessageBuffer::new();
    msg.write(&660.0f32);
    handle.control(tone, "frequency", msg);

    std::thread::sleep(Duration::from_secs(TONE_SECONDS));

    handle.control(tone, "stop", MessageBuffer::new());

    std::thread::sleep(Duration::from_millis(100));
    for item in handle.collect_garbage() {
        log::info!("retired \"{}\"", item.id());
    }
}
