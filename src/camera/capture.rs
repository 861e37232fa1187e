use opencv::{
    core::{Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};

use crate::camera::{CaptureDevice, DeviceFactory, Frame};
use crate::config::CameraConfig;
use crate::error::{Error, Result};

fn cv_err(e: opencv::Error) -> Error {
    Error::DeviceUnavailable(e.to_string())
}

/// OpenCVのVideoCaptureを使用したカメラキャプチャ
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// 解像度とFPSを指定してカメラを開く（ドライバが別の値を選ぶこともある）
    pub fn open_with_config(index: i32, width: u32, height: u32, fps: u32) -> Result<Self> {
        let mut capture =
            VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32).map_err(cv_err)?;

        if !capture.is_opened().map_err(cv_err)? {
            return Err(Error::DeviceUnavailable(format!("camera {} is not available", index)));
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64).map_err(cv_err)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64).map_err(cv_err)?;
        capture.set(videoio::CAP_PROP_FPS, fps as f64).map_err(cv_err)?;
        // ドライバのキューには最新フレームだけ残す
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0).map_err(cv_err)?;

        let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(cv_err)? as u32;
        let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(cv_err)? as u32;
        let actual_fps = capture.get(videoio::CAP_PROP_FPS).map_err(cv_err)?;
        tracing::debug!("Camera {} reports {}x{} @ {}fps", index, actual_width, actual_height, actual_fps);

        Ok(Self {
            capture,
            width: actual_width,
            height: actual_height,
        })
    }
}

impl CaptureDevice for OpenCvCamera {
    fn read_frame(&mut self) -> Result<Frame> {
        let mut mat = Mat::default();
        let ok = self.capture.read(&mut mat).map_err(cv_err)?;
        if !ok || mat.empty() {
            return Err(Error::DeviceUnavailable("empty frame received".to_string()));
        }
        mat_to_frame(&mat)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// BGR/BGRA/グレーの8bit Matを所有Frameにコピーする（BGRAはBGRに落とす）
pub fn mat_to_frame(mat: &Mat) -> Result<Frame> {
    let bgr = if mat.channels() == 4 {
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(mat, &mut bgr, imgproc::COLOR_BGRA2BGR).map_err(cv_err)?;
        bgr
    } else if mat.is_continuous() {
        mat.clone()
    } else {
        mat.try_clone().map_err(cv_err)?
    };

    let data = bgr.data_bytes().map_err(cv_err)?.to_vec();
    Frame::new(bgr.cols() as u32, bgr.rows() as u32, bgr.channels() as u8, data)
}

/// ストリーミング用にフレームをJPEGエンコードする
pub fn encode_jpeg(frame: &Frame, quality: i32) -> Result<Vec<u8>> {
    let flat = Mat::from_slice(frame.data()).map_err(cv_err)?;
    let mat = flat
        .reshape(frame.channels() as i32, frame.height() as i32)
        .map_err(cv_err)?
        .try_clone()
        .map_err(cv_err)?;

    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf: Vector<u8> = Vector::new();
    imgcodecs::imencode(".jpg", &mat, &mut buf, &params).map_err(cv_err)?;
    Ok(buf.to_vec())
}

/// `[camera]` 設定から [`OpenCvCamera`] を開く
#[derive(Debug, Clone)]
pub struct OpenCvFactory {
    index: i32,
    width: u32,
    height: u32,
    fps: u32,
}

impl OpenCvFactory {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            index: config.index,
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }
}

impl DeviceFactory for OpenCvFactory {
    fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        let camera = OpenCvCamera::open_with_config(self.index, self.width, self.height, self.fps)?;
        Ok(Box::new(camera))
    }

    fn describe(&self) -> String {
        format!("OpenCV camera {}", self.index)
    }
}
