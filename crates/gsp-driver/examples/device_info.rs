//! Probe every known GSP revision and print its capability record
//!
//! Runs on the software backend, so no board is needed.

use gsp_chip::compat::COMPATIBLES;
use gsp_driver::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("gsp_driver=info")
        .init();

    println!("🖼️  GSP Device Information\n");

    for (compatible, revision) in COMPATIBLES {
        let device = Device::probe(DeviceConfig::for_compatible(compatible)?)?;
        let cap = device.capability();

        println!("╔════════════════════════════════════════════════════════╗");
        println!("║  {compatible:52}  ║");
        println!("╠════════════════════════════════════════════════════════╣");
        println!("║    Revision:      {:37} ║", revision.to_string());
        println!("║    Version:       {:37} ║", cap.version);
        println!("║    Cores:         {:37} ║", cap.core_cnt);
        println!("║    Jobs/submit:   {:37} ║", cap.io_cnt);
        println!(
            "║    Layers:        {:37} ║",
            format!("{} ({} image)", cap.max_layer, cap.max_img_layer)
        );
        println!(
            "║    Output max:    {:37} ║",
            format!("{}x{}", cap.out_max.rect_w, cap.out_max.rect_h)
        );
        println!(
            "║    Output min:    {:37} ║",
            format!("{}x{}", cap.out_min.rect_w, cap.out_min.rect_h)
        );
        println!("║    Buffer type:   {:37} ║", format!("{:?}", cap.buf_type));
        println!("╚════════════════════════════════════════════════════════╝\n");
    }

    Ok(())
}
