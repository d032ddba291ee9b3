//! Build script for DRKS
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! for `drks --build-info`.

fn main() {
    // Re-run build if the packager overrides the default backend binaries
    println!("cargo:rerun-if-env-changed=DRKS_SYSTEM_FIREWALL_CMD");

    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
