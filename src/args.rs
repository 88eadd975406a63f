use clap::Parser;

/// This is a tabulation program for market-research surveys.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The file describing the study, its data sources and the analyses to run, in JSON format.
    /// For more information about the file format, read the documentation of the survey_metrics::manual module.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path) A reference report in JSON format. If provided, surveytab will
    /// check that the computed report matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the report will be written in JSON format to the given
    /// location. Setting this option overrides the path that may be specified in the configuration.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path or empty) If specified, the responses are read from this file instead of the
    /// file of the first data source of the configuration.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (csv, xlsx or json) The type of the input. Overrides the provider of the first data source.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// Segments with fewer respondents are suppressed in crosstabs. Overrides the configuration.
    #[clap(long, value_parser)]
    pub min_base: Option<usize>,

    /// If passed as an argument, speeders and straightliners are removed before the analyses.
    #[clap(long, takes_value = false)]
    pub drop_flagged: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
