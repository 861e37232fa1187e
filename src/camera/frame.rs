use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// カメラ画像1枚の所有スナップショット。
///
/// 画素は行優先・インターリーブ・各チャンネル8bit（3チャンネルならBGR）。
/// `Clone` は画素バッファごとコピーするので、保持者同士でメモリを共有しない。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
    captured_at: DateTime<Utc>,
    sequence: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if width == 0 || height == 0 || channels == 0 {
            return Err(Error::InvalidInput(format!(
                "frame dimensions must be non-zero ({}x{}x{})",
                width, height, channels
            )));
        }
        if data.len() != expected {
            return Err(Error::InvalidInput(format!(
                "frame buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
            captured_at: Utc::now(),
            sequence: 0,
        })
    }

    /// 全画素を同じ値で埋めたフレーム
    pub fn filled(width: u32, height: u32, channels: u8, value: u8) -> Result<Self> {
        let len = width as usize * height as usize * channels as usize;
        Self::new(width, height, channels, vec![value; len])
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// 取得ストリーム内の通し番号。FrameSource 以外で作ったフレームは0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// キャプチャからの経過ミリ秒（負にはならない）
    pub fn age_ms(&self) -> u64 {
        (Utc::now() - self.captured_at).num_milliseconds().max(0) as u64
    }

}
