//! Device and image info command implementations.

use {
    anyhow::{Context, Result},
    console::style,
    rmiflash::{
        DeviceInfo, FirmwareImage, ImageBuffer, ImageHeader,
        image::synaptics::FIRMWARE_OFFSET,
    },
    serde_json::{Value, json},
    std::path::Path,
};

use super::{device_config, open_flasher};
use crate::Cli;
use crate::config::Config;

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let device = device_config(cli, config)?;
    let mut flasher = open_flasher(cli, &device)?;
    let info = flasher
        .read_device_info()
        .context("Failed to read device information")?;

    if json {
        let output = json!({
            "ok": true,
            "data": device_info_json(&info),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("\n{}", style("Controller").bold().underlined());
    if info.recovery_mode {
        eprintln!(
            "  Mode:        {}",
            style("bootloader recovery (F35)").red().bold()
        );
    } else {
        eprintln!("  Mode:        {}", style("application").green());
    }
    if let Some(product_id) = &info.product_id {
        eprintln!("  Product ID:  {}", style(product_id).cyan());
    }
    if let Some(version) = info.firmware_version {
        eprintln!("  Firmware:    {version:#08x}");
    }
    if let Some(package_id) = info.package_id {
        eprintln!("  Package ID:  {package_id:#06x}");
    }
    if let Some(geometry) = &info.geometry {
        eprintln!("  Block size:  {} bytes", geometry.block_size);
        eprintln!(
            "  Blocks:      firmware {}, config {}, display config {}",
            geometry.firmware_blocks, geometry.config_blocks, geometry.display_config_blocks
        );
    }
    if info.recovery_mode {
        eprintln!(
            "\n{} Run `rmiflash recover <IMAGE>` to restore the controller",
            style("→").green().bold()
        );
    }

    Ok(())
}

fn device_info_json(info: &DeviceInfo) -> Value {
    json!({
        "recovery_mode": info.recovery_mode,
        "product_id": info.product_id,
        "firmware_version": info.firmware_version,
        "package_id": info.package_id.map(|id| format!("0x{id:04X}")),
        "geometry": info.geometry.map(|g| json!({
            "block_size": g.block_size,
            "firmware_blocks": g.firmware_blocks,
            "config_blocks": g.config_blocks,
            "display_config_blocks": g.display_config_blocks,
        })),
    })
}

fn load_image(path: &Path) -> Result<FirmwareImage> {
    let buffer = ImageBuffer::from_file(path)
        .with_context(|| format!("Failed to load image {}", path.display()))?;
    FirmwareImage::parse(buffer)
        .with_context(|| format!("Failed to parse image {}", path.display()))
}

/// Image info command implementation.
pub(crate) fn cmd_image_info(path: &Path, json: bool) -> Result<()> {
    let image = load_image(path)?;
    let header = image.header();
    let total_size = image.as_bytes().len();

    if json {
        let output = json!({
            "ok": true,
            "data": image_header_json(header, total_size),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("\n{}", style("Firmware image").bold().underlined());
    eprintln!("  Product ID:      {}", style(&header.product_id).cyan());
    eprintln!(
        "  Image version:   {}",
        header.image_version.as_deref().unwrap_or("unknown")
    );
    eprintln!("  Format version:  {}", header.format_version);
    eprintln!("  Total size:      {total_size} bytes");

    eprintln!("\n{}", style("Sections").bold().underlined());
    eprintln!(
        "  {} firmware        @ 0x{FIRMWARE_OFFSET:06X} ({} bytes)",
        style("•").dim(),
        header.firmware_size
    );
    eprintln!(
        "  {} config          @ 0x{:06X}",
        style("•").dim(),
        header.config_offset()
    );
    eprintln!(
        "  {} display config  @ 0x{:06X}",
        style("•").dim(),
        header.display_config_offset
    );
    match header.lockdown_offset() {
        Some(offset) if header.lockdown_flag != 0 => eprintln!(
            "  {} lockdown        @ 0x{offset:06X} ({} blocks)",
            style("•").dim(),
            header.lockdown_block_count()
        ),
        _ => eprintln!("  {} lockdown        {}", style("•").dim(), style("none").dim()),
    }

    Ok(())
}

fn image_header_json(header: &ImageHeader, total_size: usize) -> Value {
    let lockdown = match header.lockdown_offset() {
        Some(offset) if header.lockdown_flag != 0 => json!({
            "offset": format!("0x{offset:04X}"),
            "blocks": header.lockdown_block_count(),
        }),
        _ => Value::Null,
    };
    json!({
        "product_id": header.product_id,
        "image_version": header.image_version,
        "format_version": header.format_version,
        "total_size": total_size,
        "firmware": {
            "offset": format!("0x{FIRMWARE_OFFSET:06X}"),
            "size": header.firmware_size,
        },
        "config_offset": format!("0x{:06X}", header.config_offset()),
        "display_config_offset": format!("0x{:06X}", header.display_config_offset),
        "lockdown": lockdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmiflash::FlashGeometry;

    fn header(format_version: u8, lockdown_flag: u8) -> ImageHeader {
        ImageHeader {
            format_version,
            firmware_size: 0x400,
            product_id: "PLG626".to_string(),
            image_version: Some("1.02".to_string()),
            lockdown_flag,
            display_config_offset: 0x800,
        }
    }

    #[test]
    fn test_image_header_json() {
        let value = image_header_json(&header(6, 1), 0x1000);
        assert_eq!(value["product_id"], "PLG626");
        assert_eq!(value["image_version"], "1.02");
        assert_eq!(value["format_version"], 6);
        assert_eq!(value["firmware"]["offset"], "0x000100");
        assert_eq!(value["firmware"]["size"], 0x400);
        assert_eq!(value["config_offset"], "0x000500");
        assert_eq!(value["display_config_offset"], "0x000800");
        assert_eq!(value["lockdown"]["offset"], "0x00B0");
        assert_eq!(value["lockdown"]["blocks"], 5);
    }

    #[test]
    fn test_image_header_json_without_lockdown() {
        assert!(image_header_json(&header(6, 0), 0x1000)["lockdown"].is_null());
        assert!(image_header_json(&header(9, 1), 0x1000)["lockdown"].is_null());
    }

    #[test]
    fn test_device_info_json() {
        let info = DeviceInfo {
            product_id: Some("TD4191-A00".to_string()),
            firmware_version: Some(0x010203),
            package_id: Some(0x4191),
            recovery_mode: false,
            geometry: Some(FlashGeometry {
                block_size: 16,
                firmware_blocks: 300,
                config_blocks: 2,
                display_config_blocks: 2,
            }),
        };
        let value = device_info_json(&info);
        assert_eq!(value["product_id"], "TD4191-A00");
        assert_eq!(value["firmware_version"], 0x010203);
        assert_eq!(value["package_id"], "0x4191");
        assert_eq!(value["recovery_mode"], false);
        assert_eq!(value["geometry"]["firmware_blocks"], 300);
    }

    #[test]
    fn test_device_info_json_recovery() {
        let info = DeviceInfo {
            product_id: None,
            firmware_version: None,
            package_id: None,
            recovery_mode: true,
            geometry: None,
        };
        let value = device_info_json(&info);
        assert_eq!(value["recovery_mode"], true);
        assert!(value["geometry"].is_null());
        assert!(value["product_id"].is_null());
    }
}
