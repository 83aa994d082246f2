//! sf-audio: native backend contract, real cpal/symphonia implementation,
//! and a deterministic mock for tests and the CLI harness.

mod backend;
mod cpal_backend;
mod decode;
mod device;
mod error;
mod mock_backend;
mod playback;

pub use backend::{DecodeFlags, DecodeStreamHandle, MixerHandle, MixerKind, NativeBackend, Spatial3DParams};
pub use cpal_backend::CpalSymphoniaBackend;
pub use decode::{decode_file, DecodedAudio};
pub use device::{
    get_default_output_device, get_host, get_host_info, get_output_device_by_name, list_available_hosts,
    list_output_devices, DeviceInfo, DeviceManager, DeviceSelection, HostInfo,
};
pub use error::{AudioError, AudioResult};
pub use mock_backend::{MockBackend, SyntheticClip};
pub use playback::{cone_angle_deg, cone_attenuation, distance_attenuation, equal_power_pan, DecodeStream};
