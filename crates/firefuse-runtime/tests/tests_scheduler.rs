use firefuse_config::DeviceConfig;
use firefuse_io::DeviceEndpoint;
use firefuse_runtime::{BackgroundWorker, EntityRegistry, StageMask, WorkerRunner, WorkerSignal};
use firefuse_structures::OwnedBuffer;
use firefuse_vision::frame::encode_jpeg;
use firefuse_vision::{CameraNode, StageEngine, StaticFrameSource, VisionEndpoint};
use image::{DynamicImage, GrayImage, Luma};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn frame_jpeg() -> Vec<u8> {
    let image = GrayImage::from_fn(24, 12, |x, _| Luma([(x * 10) as u8]));
    encode_jpeg(&DynamicImage::ImageLuma8(image)).unwrap()
}

fn worker(idle_period: Duration) -> (Arc<BackgroundWorker>, Arc<EntityRegistry>) {
    let camera = Arc::new(CameraNode::new(
        Some(Box::new(StaticFrameSource::new(frame_jpeg()))),
        Duration::from_secs(3),
    ));
    let registry = Arc::new(EntityRegistry::new());
    let worker = Arc::new(BackgroundWorker::new(
        camera,
        Arc::clone(&registry),
        Arc::new(StageEngine),
        idle_period,
    ));
    (worker, registry)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[cfg(test)]
mod test_scheduler {
    use super::*;

    #[test]
    fn test_idle_action_after_idle_period() {
        let (worker, _registry) = worker(secs(15));
        let t0 = Instant::now();

        let first = worker.tick(t0);
        assert!(first.contains(StageMask::CAMERA));
        assert!(first.contains(StageMask::MONITOR));
        assert!(worker.camera().monitor().is_fresh());

        for s in 1..15 {
            assert_eq!(worker.tick(t0 + secs(s)), StageMask::empty(), "tick at +{}s", s);
        }

        let idle = worker.tick(t0 + secs(15));
        assert_eq!(idle, StageMask::IDLE);
        assert!(!worker.camera().monitor().is_fresh());

        // The discarded monitor frame is refreshed on the next tick, and the idle clock restarts
        assert_eq!(worker.tick(t0 + secs(16)), StageMask::MONITOR);
        assert_eq!(worker.tick(t0 + secs(29)), StageMask::empty());
        assert_eq!(worker.tick(t0 + secs(30)), StageMask::IDLE);
    }

    #[test]
    fn test_consumed_results_are_recomputed() {
        let (worker, registry) = worker(secs(15));
        let cve = Arc::new(VisionEndpoint::new("/cv/1/gray/cve/ramp"));
        cve.pipeline()
            .post(OwnedBuffer::from(json!([{"op": "stats", "name": "summary"}]).to_string()));
        registry.insert_vision(Arc::clone(&cve));

        // Initial results are current until a client reads them
        let t0 = Instant::now();
        let mask = worker.tick(t0);
        assert!(!mask.contains(StageMask::PROCESS));
        assert_eq!(&*cve.process_result().get().data(), b"{}");
        cve.save_result().get();

        let mask = worker.tick(t0 + secs(1));
        assert!(mask.contains(StageMask::SAVE));
        assert!(mask.contains(StageMask::PROCESS));

        let result: Value = serde_json::from_slice(&cve.process_result().get().data()).unwrap();
        assert_eq!(result["summary"]["width"], json!(24));

        // Only process was consumed; save stays current
        let mask = worker.tick(t0 + secs(2));
        assert!(mask.contains(StageMask::PROCESS));
        assert!(!mask.contains(StageMask::SAVE));
        assert!(cve.process_result().is_fresh());
    }

    #[test]
    fn test_device_stage_takes_pending_command() {
        let (worker, registry) = worker(secs(15));
        let device = Arc::new(DeviceEndpoint::new(DeviceConfig {
            path: "/cnc/tinyg".to_string(),
            ..Default::default()
        }));
        registry.insert_device(Arc::clone(&device));

        device.post_command("G0 X10\n");
        let mask = worker.tick(Instant::now());
        assert!(mask.contains(StageMask::DEVICE));
        assert!(!device.has_pending_command());

        // No serial link: the send failure becomes an ERROR reply
        let reply: Value = serde_json::from_slice(&device.replies().peek().data()).unwrap();
        assert_eq!(reply["status"], json!("ERROR"));
        assert_eq!(reply["gcode"], json!("G0 X10"));
    }

    #[test]
    fn test_runner_serves_monitor_and_stops() {
        let (worker, _registry) = worker(secs(15));
        let signal = Arc::new(WorkerSignal::new());
        let mut runner =
            WorkerRunner::new(Arc::clone(&worker), Arc::clone(&signal), Duration::from_millis(5));
        runner.start().unwrap();
        assert!(runner.is_running());
        assert!(runner.start().is_err());

        let frame = worker
            .camera()
            .monitor()
            .get_blocking(Some(Duration::from_secs(5)));
        assert!(!frame.is_empty());

        runner.stop();
        assert!(!runner.is_running());
    }
}
