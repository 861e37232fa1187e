use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::camera::{CaptureDevice, DeviceFactory, Frame};
use crate::config::CameraConfig;

/// フレームソースの状態スナップショット（状態問い合わせ用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSourceStatus {
    pub available: bool,
    pub device_index: i32,
    pub width: u32,
    pub height: u32,
    pub has_frame: bool,
    pub frames_captured: u64,
    pub last_frame_age_ms: Option<u64>,
    pub reconnects: u64,
}

/// 取得スレッドと読み出し側で共有する状態
struct Shared {
    latest: Mutex<Option<Frame>>,
    running: AtomicBool,
    connected: AtomicBool,
    frames_captured: AtomicU64,
    reconnects: AtomicU64,
    /// 推論用の空読み出しを既に警告済みか
    missing_reported: AtomicBool,
    /// 最後にフレームを保存した、またはデバイスを（再）オープンした時刻
    last_progress: Mutex<Instant>,
}

impl Shared {
    fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            missing_reported: AtomicBool::new(false),
            last_progress: Mutex::new(Instant::now()),
        }
    }

    /// 停止していなければ `frame` に番号を振って保存する。
    ///
    /// `running` はスロットのロック内で確認するので、`release` が
    /// スロットを空にした後に書き込まれることはない。
    fn store(&self, frame: Frame) -> bool {
        let previous = {
            let mut slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_running() {
                return false;
            }
            let sequence = self.frames_captured.fetch_add(1, Ordering::AcqRel) + 1;
            slot.replace(frame.with_sequence(sequence))
        };
        // 古いバッファはロック外で解放
        drop(previous);
        self.touch();
        true
    }

    fn copy_latest(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        let previous = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(previous);
    }

    fn touch(&self) {
        *self.last_progress.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn since_progress(&self) -> Duration {
        self.last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// 取得ループのタイミング設定（[`CameraConfig`] から）
#[derive(Debug, Clone, Copy)]
struct Timing {
    frame_interval: Duration,
    retry_interval: Duration,
    max_backoff: Duration,
    reconnect_after_failures: u32,
    reconnect_interval: Duration,
    stall_timeout: Duration,
}

impl Timing {
    fn from_config(config: &CameraConfig) -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / config.fps.max(1) as f64),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            reconnect_after_failures: config.reconnect_after_failures.max(1),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            stall_timeout: Duration::from_millis(config.stall_timeout_ms),
        }
    }
}

/// `failures` 回連続で失敗した後の待ち時間。`base` から倍々で増え `max` で頭打ち
pub(crate) fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// 別スレッドでカメラキャプチャを行い、最新フレームを1枚だけ保持する。
///
/// 1本のスレッドがデバイスを読んでスロットを上書きし、読み出し側は何人でも
/// そのコピーを受け取る。スロットのロックは代入かコピーの間だけで、デバイス
/// 読み込み中は保持しない。デバイス障害は呼び出し側にエラーとして届かず、
/// [`FrameSource::status`] の `available == false` とフレーム取得の `None` に現れる。
pub struct FrameSource {
    config: CameraConfig,
    factory: Arc<dyn DeviceFactory>,
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FrameSource {
    pub fn new(config: CameraConfig, factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            config,
            factory,
            shared: Arc::new(Shared::new()),
            handle: Mutex::new(None),
        }
    }

    /// デバイスを開いて取得を開始する。
    ///
    /// オープンに失敗しても劣化状態（`available == false`）で正常に戻る。
    /// 実行中なら何もしない。
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return;
        }

        info!(
            "Opening {} (index {}, requested {}x{} @ {}fps)",
            self.factory.describe(),
            self.config.index,
            self.config.width,
            self.config.height,
            self.config.fps
        );

        let device = match self.factory.open() {
            Ok(device) => device,
            Err(e) => {
                warn!("Camera {} not available, running without camera: {}", self.config.index, e);
                self.shared.connected.store(false, Ordering::Release);
                return;
            }
        };

        let (w, h) = device.resolution();
        info!("Camera {} opened: {}x{}", self.config.index, w, h);

        self.shared.connected.store(true, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        self.shared.touch();

        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.factory);
        let timing = Timing::from_config(&self.config);
        let spawned = thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || acquisition_loop(shared, factory, device, timing));

        match spawned {
            Ok(h) => *handle = Some(h),
            Err(e) => {
                warn!("Failed to spawn capture thread: {}", e);
                self.shared.running.store(false, Ordering::Release);
                self.shared.connected.store(false, Ordering::Release);
            }
        }
    }

    /// ストリーミング用に現在のフレームのコピーを返す。待たない。
    pub fn peek(&self) -> Option<Frame> {
        self.shared.copy_latest()
    }

    /// 推論用に、呼び出し時点で最新のフレームのコピーを返す。
    ///
    /// [`peek`](Self::peek) と同じスロットを読む。推論のために予約も破棄もしない。
    pub fn capture_for_inference(&self) -> Option<Frame> {
        let frame = self.shared.copy_latest();
        match &frame {
            Some(f) => {
                self.shared.missing_reported.store(false, Ordering::Release);
                debug!("Inference frame #{} ({} ms old)", f.sequence(), f.age_ms());
            }
            None => {
                if self.shared.missing_reported.swap(true, Ordering::AcqRel) {
                    debug!("No frame available for inference");
                } else {
                    warn!("No frame available for inference");
                }
            }
        }
        frame
    }

    /// 現在のフレームのJPEG。エンコードはロック外でコピーに対して行う
    #[cfg(feature = "desktop")]
    pub fn peek_jpeg(&self, quality: i32) -> Option<Vec<u8>> {
        let frame = self.peek()?;
        match crate::camera::capture::encode_jpeg(&frame, quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                warn!("Failed to encode frame: {}", e);
                None
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.shared.is_running()
            && self.shared.connected.load(Ordering::Acquire)
            && self.shared.since_progress() <= Duration::from_millis(self.config.stall_timeout_ms)
    }

    pub fn status(&self) -> FrameSourceStatus {
        let last_frame_age_ms = self
            .shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Frame::age_ms);

        FrameSourceStatus {
            available: self.is_available(),
            device_index: self.config.index,
            width: self.config.width,
            height: self.config.height,
            has_frame: last_frame_age_ms.is_some(),
            frames_captured: self.shared.frames_captured.load(Ordering::Acquire),
            last_frame_age_ms,
            reconnects: self.shared.reconnects.load(Ordering::Acquire),
        }
    }

    /// 取得を止めてデバイスを解放する。何度呼んでもよい。
    ///
    /// キャプチャスレッドは最大 `release_timeout_ms` だけ待つ。デバイス読み込みで
    /// 止まっているスレッドは切り離し、読み込みが戻った時点でデバイスを解放させる。
    pub fn release(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = handle {
            info!("Releasing camera {}", self.config.index);
            let deadline = Instant::now() + Duration::from_millis(self.config.release_timeout_ms);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("Capture thread panicked");
                }
            } else {
                warn!(
                    "Capture thread still blocked after {} ms, detaching it",
                    self.config.release_timeout_ms
                );
            }
        }
        self.shared.connected.store(false, Ordering::Release);
        self.shared.clear();
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// 最大 `total` 待つ。停止したら早めに戻る
fn sleep_while_running(shared: &Shared, total: Duration) {
    let step = Duration::from_millis(10);
    let deadline = Instant::now() + total;
    while shared.is_running() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(step.min(deadline - now));
    }
}

fn acquisition_loop(
    shared: Arc<Shared>,
    factory: Arc<dyn DeviceFactory>,
    device: Box<dyn CaptureDevice>,
    timing: Timing,
) {
    info!("Camera capture thread started");
    let mut device = Some(device);
    let mut failures = 0u32;
    let mut stall_reported = false;

    while shared.is_running() {
        if device.is_none() {
            shared.connected.store(false, Ordering::Release);
            sleep_while_running(&shared, timing.reconnect_interval);
            if !shared.is_running() {
                break;
            }
            match factory.open() {
                Ok(d) => {
                    info!("Camera reconnected");
                    shared.reconnects.fetch_add(1, Ordering::AcqRel);
                    shared.connected.store(true, Ordering::Release);
                    shared.touch();
                    failures = 0;
                    device = Some(d);
                }
                Err(e) => warn!("Camera reconnection failed: {}", e),
            }
            continue;
        }
        let Some(dev) = device.as_mut() else {
            continue;
        };

        let start = Instant::now();
        match dev.read_frame() {
            Ok(frame) => {
                failures = 0;
                if stall_reported {
                    info!("Camera delivering frames again");
                    stall_reported = false;
                }
                if !shared.store(frame) {
                    break;
                }
            }
            Err(e) => {
                failures += 1;
                if !stall_reported && shared.since_progress() > timing.stall_timeout {
                    warn!("No frame for {:?}, camera considered stalled", timing.stall_timeout);
                    stall_reported = true;
                }
                if failures >= timing.reconnect_after_failures {
                    warn!("{} consecutive read failures ({}), reconnecting", failures, e);
                    device = None;
                    shared.connected.store(false, Ordering::Release);
                    continue;
                }
                let delay = backoff_delay(timing.retry_interval, timing.max_backoff, failures);
                debug!("Failed to read frame ({}), retrying in {:?}", e, delay);
                sleep_while_running(&shared, delay);
                continue;
            }
        }

        let elapsed = start.elapsed();
        if elapsed < timing.frame_interval {
            sleep_while_running(&shared, timing.frame_interval - elapsed);
        }
    }

    drop(device);
    shared.connected.store(false, Ordering::Release);
    info!("Camera capture thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::sync::atomic::AtomicUsize;

    /// Produces frames whose first byte is a counter; fails on chosen reads
    struct FakeDevice {
        reads: u8,
        fail_from: Option<u8>,
    }

    impl CaptureDevice for FakeDevice {
        fn read_frame(&mut self) -> Result<Frame> {
            self.reads = self.reads.wrapping_add(1);
            if let Some(n) = self.fail_from {
                if self.reads >= n {
                    return Err(Error::DeviceUnavailable("read failed".into()));
                }
            }
            let mut frame = Frame::filled(4, 3, 3, 0)?;
            frame.data_mut()[0] = self.reads;
            Ok(frame)
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 3)
        }
    }

    fn fast_config() -> CameraConfig {
        CameraConfig {
            width: 4,
            height: 3,
            fps: 200,
            retry_interval_ms: 1,
            max_backoff_ms: 5,
            reconnect_after_failures: 3,
            reconnect_interval_ms: 5,
            stall_timeout_ms: 5000,
            ..CameraConfig::default()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn healthy_factory() -> Arc<dyn DeviceFactory> {
        Arc::new(|| -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(FakeDevice { reads: 0, fail_from: None }))
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, max, 5), max);
        assert_eq!(backoff_delay(base, max, u32::MAX), max);
    }

    #[test]
    fn test_open_failure_degrades() {
        let factory: Arc<dyn DeviceFactory> = Arc::new(|| -> Result<Box<dyn CaptureDevice>> {
            Err(Error::DeviceUnavailable("no such device".into()))
        });
        let source = FrameSource::new(fast_config(), factory);
        source.start();

        let status = source.status();
        assert!(!status.available);
        assert!(!status.has_frame);
        assert_eq!(status.frames_captured, 0);
        assert!(source.capture_for_inference().is_none());
        assert!(source.peek().is_none());
    }

    #[test]
    fn test_frames_flow_into_slot() {
        let source = FrameSource::new(fast_config(), healthy_factory());
        source.start();
        assert!(wait_until(|| source.status().has_frame));

        let status = source.status();
        assert!(status.available);
        assert_eq!((status.width, status.height), (4, 3));
        assert!(status.frames_captured >= 1);

        let frame = source.capture_for_inference().unwrap();
        assert!(frame.sequence() >= 1);
        assert_eq!(frame.resolution(), (4, 3));
        source.release();
    }

    #[test]
    fn test_peek_and_inference_copies_are_independent() {
        let source = FrameSource::new(fast_config(), healthy_factory());
        source.start();
        assert!(wait_until(|| source.peek().is_some()));

        let mut streamed = source.peek().unwrap();
        let inferred = source.capture_for_inference().unwrap();
        let before = inferred.data().to_vec();

        for b in streamed.data_mut() {
            *b = 0xAA;
        }
        assert_eq!(inferred.data(), &before[..]);

        // the slot itself is untouched as well
        let again = source.peek().unwrap();
        assert!(again.data().iter().skip(1).all(|&b| b == 0));
        source.release();
    }

    #[test]
    fn test_reconnects_after_repeated_read_failures() {
        let opens = Arc::new(AtomicUsize::new(0));
        let opens_ref = Arc::clone(&opens);
        let factory: Arc<dyn DeviceFactory> = Arc::new(move || -> Result<Box<dyn CaptureDevice>> {
            let n = opens_ref.fetch_add(1, Ordering::SeqCst);
            // first device dies after two frames, later ones stay healthy
            let fail_from = if n == 0 { Some(3) } else { None };
            Ok(Box::new(FakeDevice { reads: 0, fail_from }))
        });

        let source = FrameSource::new(fast_config(), factory);
        source.start();
        assert!(wait_until(|| source.status().reconnects >= 1));
        assert!(wait_until(|| source.status().available));
        assert!(opens.load(Ordering::SeqCst) >= 2);
        assert!(source.capture_for_inference().is_some());
        source.release();
    }

    /// Delivers one frame, then blocks in every further read
    struct HangingDevice {
        delivered: bool,
        hang: Duration,
    }

    impl CaptureDevice for HangingDevice {
        fn read_frame(&mut self) -> Result<Frame> {
            if self.delivered {
                thread::sleep(self.hang);
            }
            self.delivered = true;
            Frame::filled(4, 3, 3, 7)
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 3)
        }
    }

    #[test]
    fn test_release_does_not_wait_for_blocked_read() {
        let factory: Arc<dyn DeviceFactory> = Arc::new(|| -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(HangingDevice {
                delivered: false,
                hang: Duration::from_secs(3),
            }))
        });
        let config = CameraConfig {
            release_timeout_ms: 100,
            ..fast_config()
        };
        let source = FrameSource::new(config, factory);
        source.start();
        assert!(wait_until(|| source.peek().is_some()));
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        source.release();
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert!(!source.status().available);
        assert!(source.peek().is_none());

        // release already ran; drop has nothing left to wait for
        let started = Instant::now();
        drop(source);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_missing_frame_warning_is_not_repeated() {
        let factory: Arc<dyn DeviceFactory> = Arc::new(|| -> Result<Box<dyn CaptureDevice>> {
            Err(Error::DeviceUnavailable("no such device".into()))
        });
        let source = FrameSource::new(fast_config(), factory);
        source.start();
        assert!(source.capture_for_inference().is_none());
        assert!(source.shared.missing_reported.load(Ordering::Acquire));
        assert!(source.capture_for_inference().is_none());
        assert!(source.shared.missing_reported.load(Ordering::Acquire));
    }

    #[test]
    fn test_release_is_idempotent() {
        let source = FrameSource::new(fast_config(), healthy_factory());
        source.start();
        assert!(wait_until(|| source.status().has_frame));

        source.release();
        source.release();

        let status = source.status();
        assert!(!status.available);
        assert!(!status.has_frame);
        assert!(source.peek().is_none());
    }

    #[test]
    fn test_start_twice_keeps_one_thread() {
        let opens = Arc::new(AtomicUsize::new(0));
        let opens_ref = Arc::clone(&opens);
        let factory: Arc<dyn DeviceFactory> = Arc::new(move || -> Result<Box<dyn CaptureDevice>> {
            opens_ref.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice { reads: 0, fail_from: None }))
        });
        let source = FrameSource::new(fast_config(), factory);
        source.start();
        source.start();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_readers() {
        let source = Arc::new(FrameSource::new(fast_config(), healthy_factory()));
        source.start();
        assert!(wait_until(|| source.peek().is_some()));

        let readers: Vec<_> = (0..4)
            .map(|i| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    let mut seen = 0;
                    for _ in 0..50 {
                        let frame = if i % 2 == 0 {
                            source.peek()
                        } else {
                            source.capture_for_inference()
                        };
                        if frame.is_some() {
                            seen += 1;
                        }
                    }
                    seen
                })
            })
            .collect();

        for r in readers {
            assert_eq!(r.join().unwrap(), 50);
        }
        source.release();
    }
}
