use super::{Plugin, PluginArgs, Transform};
use crate::capture::DetectionSet;
use crate::frame::VideoFrame;
use crate::hotkey::FlagSnapshot;
use anyhow::Result;

pub const NAME: &str = "passthrough";

pub struct Passthrough;

impl Transform for Passthrough {
    fn process(&mut self, frame: VideoFrame, _: Option<&DetectionSet>, _: &FlagSnapshot) -> Result<VideoFrame> {
        Ok(frame)
    }
}

pub fn create(args: &PluginArgs) -> Result<Plugin> {
    args.allow_only(NAME, &[])?;
    Ok(Plugin::Simple(Box::new(Passthrough)))
}
