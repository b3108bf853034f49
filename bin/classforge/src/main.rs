use classforge::jvm::class_file::ClassReader;
use classforge::jvm::class_graph::{ClassGraph, ClassGraphArenas, ClassHierarchy, ObjectHierarchy};
use classforge::jvm::{ComputeMode, Error};

use clap::{crate_version, Arg, Command};
use std::fs;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("classforge")
        .version(crate_version!())
        .about("Rebuild a JVM class file, recomputing max stack, max locals, and stack map frames")
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("OUTPUT")
                .required(true)
                .help("Where to write the rebuilt class file"),
        )
        .arg(
            Arg::new("compute")
                .long("compute")
                .value_parser(["frames", "maxs", "nothing"])
                .default_value("frames")
                .help("What to recompute in every method body"),
        )
        .arg(
            Arg::new("hierarchy")
                .long("hierarchy")
                .value_parser(["object", "java"])
                .default_value("object")
                .help(
                    "How to find common superclasses: `object` always answers `java/lang/Object`, \
                     `java` knows a handful of `java.lang` classes and rejects any other",
                ),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class file to rebuild")
                .required(true)
                .index(1),
        )
        .get_matches();

    let mode = match matches.get_one::<String>("compute").map(String::as_str) {
        Some("maxs") => ComputeMode::MaxStackAndLocals,
        Some("nothing") => ComputeMode::Nothing,
        _ => ComputeMode::Frames,
    };

    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    let hierarchy: &dyn ClassHierarchy =
        match matches.get_one::<String>("hierarchy").map(String::as_str) {
            Some("java") => {
                class_graph.insert_java_library_types();
                &class_graph
            }
            _ => &ObjectHierarchy,
        };

    let input = matches.get_one::<String>("INPUT").unwrap();
    let output = matches.get_one::<String>("output").unwrap();

    log::info!("Reading '{}'", input);
    let bytes = fs::read(input)?;
    let reader = ClassReader::parse(&bytes)?;
    log::info!(
        "Replaying {} methods (version {}.{}, {:?})",
        reader.methods.len(),
        reader.version.major_version,
        reader.version.minor_version,
        mode
    );
    let class_file = reader.replay(mode, hierarchy)?;

    log::info!("Writing '{}'", output);
    class_file.save_to_path(output, true)?;
    Ok(())
}
