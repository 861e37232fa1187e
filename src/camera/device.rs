use crate::camera::Frame;
use crate::error::Result;

/// 開いたキャプチャデバイス。取得スレッドだけが所有する
pub trait CaptureDevice: Send {
    /// 次のフレームをブロッキングで読む
    fn read_frame(&mut self) -> Result<Frame>;

    /// デバイスが実際に返す解像度
    fn resolution(&self) -> (u32, u32);
}

/// キャプチャデバイスを開く。起動時と再接続のたびに呼ばれる
pub trait DeviceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureDevice>>;

    fn describe(&self) -> String {
        "camera".to_string()
    }
}

impl<F> DeviceFactory for F
where
    F: Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        self()
    }
}
