use clap::{arg, crate_version, Command};

const RCH: &str = "unreachable was reached";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let long_help = "Examples:
---------
Mutate:        `atncodec mutate -s 42 -i chromosome.bin -o mutated.bin`
Crossover:     `atncodec crossover -s 42 -a first.bin -b second.bin -o child.bin`";

    let mut main_cmd = Command::new("atncodec")
        .about("Transform grammar fuzzing chromosomes")
        .after_long_help(long_help)
        .version(crate_version!());
    main_cmd = main_cmd.subcommand(Command::new("mutate")
        .arg(arg!(-s --seed <SEED> "mutation seed").value_parser(clap::value_parser!(u64))
            .required(true))
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(true))
        .about("mutate a chromosome"));

    main_cmd = main_cmd.subcommand(Command::new("crossover")
        .arg(arg!(-s --seed <SEED> "crossover seed").value_parser(clap::value_parser!(u64))
            .required(true))
        .arg(arg!(-a --first <PATH> "first parent path").required(true))
        .arg(arg!(-b --second <PATH> "second parent path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(true))
        .about("cross two chromosomes over"));

    let matches = main_cmd.get_matches();

    if let Some(cmd) = matches.subcommand_matches("mutate") {
        let seed = cmd.get_one::<u64>("seed").expect(RCH);
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").expect(RCH);
        let dat = std::fs::read(path_in)?;
        std::fs::write(path_out, atncodec::mutate(&dat, *seed))?;
    }

    if let Some(cmd) = matches.subcommand_matches("crossover") {
        let seed = cmd.get_one::<u64>("seed").expect(RCH);
        let path_a = cmd.get_one::<String>("first").expect(RCH);
        let path_b = cmd.get_one::<String>("second").expect(RCH);
        let path_out = cmd.get_one::<String>("output").expect(RCH);
        let dat_a = std::fs::read(path_a)?;
        let dat_b = std::fs::read(path_b)?;
        std::fs::write(path_out, atncodec::crossover(&dat_a, &dat_b, *seed))?;
    }

    Ok(())
}
