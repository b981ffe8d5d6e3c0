use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eeprom_image_tool::{EepromImage, Layout, parse_number};

#[derive(Parser)]
#[command(name = "eeprom-image-tool")]
#[command(about = "Flash EEPROM emulation image generator and parser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a flash image from a CSV file
    Generate {
        /// Input CSV file path
        input: PathBuf,

        /// Output image file path
        output: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Parse a flash image to a CSV file
    Parse {
        /// Input image file path
        input: PathBuf,

        /// Output CSV file path
        output: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,
    },
}

/// Sector placement on the target, all values in bytes (decimal or 0x prefixed hex)
#[derive(Args)]
struct LayoutArgs {
    /// Start address of the main sector
    #[arg(long, value_parser = parse_number)]
    main_base: u32,

    /// Size of the main sector
    #[arg(long, value_parser = parse_number)]
    main_size: u32,

    /// Start address of the swap sector
    #[arg(long, value_parser = parse_number)]
    swap_base: u32,

    /// Size of the swap sector
    #[arg(long, value_parser = parse_number)]
    swap_size: u32,

    /// Page size, has to divide both sector sizes
    #[arg(short, long, value_parser = parse_number)]
    page_size: u32,
}

impl From<LayoutArgs> for Layout {
    fn from(args: LayoutArgs) -> Self {
        Layout::new(
            args.main_base,
            args.main_size,
            args.swap_base,
            args.swap_size,
            args.page_size,
        )
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            input,
            output,
            layout,
        } => {
            let layout = Layout::from(layout);

            println!("Parsing CSV file: {}", input.display());
            let image = EepromImage::from_csv_file(&input)?;
            println!("Found {} variables", image.variables.len());

            println!("Generating image...");
            image.generate_image_file(&output, layout)?;

            println!("Successfully generated EEPROM image: {}", output.display());
            println!(
                "Pages: {} main, {} swap, {} slots each",
                layout.main_size / layout.page_size,
                layout.swap_size / layout.page_size,
                layout.slots_per_page()
            );

            Ok(())
        }
        Commands::Parse {
            input,
            output,
            layout,
        } => {
            println!("Parsing image file: {}", input.display());
            let image = EepromImage::parse_image_file(&input, layout.into())?;
            println!("Found {} variables", image.variables.len());

            println!("Writing CSV file...");
            image.to_csv_file(&output)?;

            println!("Successfully parsed EEPROM image to: {}", output.display());

            Ok(())
        }
    }
}
