//! Detect keypoints on an image pyramid, suppress duplicates and print a summary per level.
//!
//! Usage: run-dedup image.jpg [levels]

use keypoint_dedup::{
    deduplicate_pyramid, detect_pyramid, gather, DedupParams, ExtractParams, GatherInput,
    GatherMode, ImageprocFiltering, InputLimits,
};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: {} image [levels]", args[0]);
        return;
    };
    let levels = args.get(2).and_then(|l| l.parse().ok()).unwrap_or(4u8);
    let img = image::open(path).unwrap().to_luma8();
    let (width, height) = (img.width() as u16, img.height() as u16);

    let extract = ExtractParams {
        threshold: 1e-4,
        border: 4,
        response_scale: 1e5,
        max_keypoints: 8192,
        original_width: width,
        original_height: height,
        ..ExtractParams::default()
    };
    let streams = detect_pyramid::<ImageprocFiltering>(&img, levels, &extract).unwrap();

    let params = DedupParams {
        image_width: width,
        image_height: height,
        border_margin: 8,
        max_output: 8192,
        limits: InputLimits {
            current: 8193,
            previous: 8193,
            next: 8193,
        },
        ..DedupParams::default()
    };
    let outputs = deduplicate_pyramid(&streams, &params).unwrap();
    for (level, output) in outputs.iter().enumerate() {
        let stats = &output.stats;
        println!(
            "level {level}: {} read, {} kept, {} suppressed, {} discarded in {} steps",
            stats.records_read, stats.emitted, stats.suppressed, stats.discarded, stats.steps
        );
    }

    let inputs: Vec<_> = outputs
        .iter()
        .map(|output| GatherInput::new(&output.records, output.records.len()))
        .collect();
    let all = gather(&inputs, GatherMode::Cyclic, 1 << 16);
    println!("{} keypoints", all.iter().filter(|kp| kp.is_valid()).count());
}
