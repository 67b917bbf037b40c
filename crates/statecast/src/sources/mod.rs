pub mod file;
pub mod pipe;

use statecast_core::ChannelSource;

use crate::config::{Config, DataSource};

/// Build the channel source selected by configuration
pub fn from_config(config: &Config) -> Box<dyn ChannelSource> {
    match config.data_source {
        DataSource::Pipe => Box::new(
            pipe::PipeSource::new(config.pipe_name.clone(), config.buffer_size)
                .with_max_frame(config.max_frame_bytes),
        ),
        DataSource::File => Box::new(file::FileSource::new(config.file_path.clone())),
    }
}
