use hypercard_reader::resources::DecodedResource;
use hypercard_reader::stack::models::PartType;
use hypercard_reader::StackFile;
use std::env;
use std::fs;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "Usage: {} <path-to-stack-file> [--resource-fork <path>] [--password <password>]",
            args[0]
        );
        std::process::exit(1);
    }

    let stack_path = &args[1];
    let mut resource_fork_path: Option<&String> = None;
    let mut password: Option<&String> = None;
    // Parse --resource-fork and --password arguments
    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--resource-fork" => {
                if let Some(path) = args.get(index + 1) {
                    resource_fork_path = Some(path);
                    index += 2;
                } else {
                    eprintln!("ERROR: --resource-fork flag requires an argument.");
                    std::process::exit(1);
                }
            }
            "--password" => {
                if let Some(value) = args.get(index + 1) {
                    password = Some(value);
                    index += 2;
                } else {
                    eprintln!("ERROR: --password flag requires an argument.");
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("ERROR: Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    println!("Reading stack file: {}", stack_path);
    if password.is_some() {
        println!("Using provided password.");
    }
    println!("{}", "=".repeat(60));

    let data_fork = match fs::read(stack_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("ERROR: Cannot read {}: {}", stack_path, e);
            std::process::exit(1);
        }
    };
    let resource_fork = match resource_fork_path {
        Some(path) => match fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                eprintln!("ERROR: Cannot read {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let opened = match password {
        Some(password) => StackFile::open_with_password(data_fork, resource_fork, password),
        None => StackFile::open(data_fork, resource_fork),
    };

    match opened {
        Ok(file) => {
            println!("\n{}", "=".repeat(60));
            println!("SUCCESS! Reading completed.");
            println!("{}", "=".repeat(60));

            let stack = file.stack();
            println!("\nStack Information:");
            println!("  Format: {:?}", file.version());
            println!("  Cards: {}", stack.card_count);
            println!("  Backgrounds: {}", stack.background_count);
            println!("  Marked cards: {}", stack.marked_card_count);
            println!("  User level: {:?}", stack.user_level);
            println!(
                "  Size: {}x{}",
                stack.size.width, stack.size.height
            );
            if let Some(version) = stack.version_at_last_modification {
                println!("  Last modified with: {}", version);
            }

            match file.cards() {
                Ok(cards) => {
                    println!("\nSample Cards (first 10):");
                    for (i, card) in cards.iter().take(10).enumerate() {
                        let buttons = card
                            .parts
                            .iter()
                            .filter(|part| part.part_type == PartType::Button)
                            .count();
                        println!(
                            "  {}. [{}] \"{}\" on background {} ({} buttons, {} fields)",
                            i + 1,
                            card.identifier,
                            card.name,
                            card.background_identifier,
                            buttons,
                            card.parts.len() - buttons,
                        );
                    }
                    if cards.len() > 10 {
                        println!("  ... and {} more", cards.len() - 10);
                    }
                }
                Err(e) => eprintln!("\nERROR: Cannot list the cards: {}", e),
            }

            match file.resources() {
                Ok(resources) if !resources.is_empty() => {
                    println!("\nResources:");
                    for resource in resources {
                        let kind = match resource.decoded() {
                            DecodedResource::Icon(_) => "icon",
                            DecodedResource::Picture(_) => "picture",
                            DecodedResource::Sound(Some(_)) => "sound",
                            DecodedResource::Sound(None) => "sound (cannot decode)",
                            DecodedResource::Generic(_) => "data",
                        };
                        println!(
                            "  {:?} {} \"{}\": {}",
                            resource.type_code, resource.identifier, resource.name, kind
                        );
                    }
                }
                Ok(_) => println!("\nNo resources."),
                Err(e) => eprintln!("\nERROR: Cannot list the resources: {}", e),
            }
        }
        Err(e) => {
            eprintln!("\nERROR: Failed to read stack file");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
