//! Built-in function descriptor tables, one block per category.

use super::{Arity, FunctionCategory, FunctionDescriptor, Purity};

macro_rules! descriptor {
    ($name:literal, $aliases:expr, $category:ident, $purity:ident, $arity:expr, $udf:literal) => {
        FunctionDescriptor {
            name: $name,
            aliases: $aliases,
            category: FunctionCategory::$category,
            purity: Purity::$purity,
            arity: $arity,
            backend_udf: $udf,
        }
    };
}

pub(super) fn builtin_descriptors() -> Vec<FunctionDescriptor> {
    vec![
        // math
        descriptor!("abs", &[], Math, PureScalar, Arity::exact(1), "math.abs"),
        descriptor!("ceil", &["ceiling"], Math, PureScalar, Arity::exact(1), "math.ceil"),
        descriptor!("floor", &[], Math, PureScalar, Arity::exact(1), "math.floor"),
        descriptor!("round", &[], Math, PureScalar, Arity::range(1, 2), "math.round"),
        descriptor!("sqrt", &[], Math, PureScalar, Arity::exact(1), "math.sqrt"),
        descriptor!("pow", &["power"], Math, PureScalar, Arity::exact(2), "math.pow"),
        descriptor!("exp", &[], Math, PureScalar, Arity::exact(1), "math.exp"),
        descriptor!("ln", &[], Math, PureScalar, Arity::exact(1), "math.ln"),
        descriptor!("log", &[], Math, PureScalar, Arity::range(1, 2), "math.log"),
        descriptor!("mod", &[], Math, PureScalar, Arity::exact(2), "math.mod"),
        descriptor!("sign", &[], Math, PureScalar, Arity::exact(1), "math.sign"),
        // string
        descriptor!("lower", &[], String, PureScalar, Arity::exact(1), "string.lower"),
        descriptor!("upper", &[], String, PureScalar, Arity::exact(1), "string.upper"),
        descriptor!("length", &["len"], String, PureScalar, Arity::exact(1), "string.length"),
        descriptor!("substr", &["substring"], String, PureScalar, Arity::range(2, 3), "string.substr"),
        descriptor!("trim", &[], String, PureScalar, Arity::exact(1), "string.trim"),
        descriptor!("ltrim", &[], String, PureScalar, Arity::exact(1), "string.ltrim"),
        descriptor!("rtrim", &[], String, PureScalar, Arity::exact(1), "string.rtrim"),
        descriptor!("concat", &[], String, PureScalar, Arity::at_least(1), "string.concat"),
        descriptor!("replace", &[], String, PureScalar, Arity::exact(3), "string.replace"),
        descriptor!("split", &[], String, PureScalar, Arity::exact(2), "string.split"),
        descriptor!("reverse_str", &[], String, PureScalar, Arity::exact(1), "string.reverse"),
        descriptor!("contains_str", &[], String, PureScalar, Arity::exact(2), "string.contains"),
        // date
        descriptor!("strftime", &[], Date, PureScalar, Arity::exact(2), "date.strftime"),
        descriptor!("relative_time", &[], Date, PureScalar, Arity::exact(2), "date.relative_time"),
        descriptor!("date_trunc", &[], Date, PureScalar, Arity::exact(2), "date.trunc"),
        // type
        descriptor!("tostring", &[], Type, PureScalar, Arity::exact(1), "type.tostring"),
        descriptor!("tonumber", &[], Type, PureScalar, Arity::exact(1), "type.tonumber"),
        descriptor!("toint", &[], Type, PureScalar, Arity::exact(1), "type.toint"),
        descriptor!("typeof", &[], Type, PureScalar, Arity::exact(1), "type.typeof"),
        descriptor!("isnull", &[], Type, PureScalar, Arity::exact(1), "type.isnull"),
        descriptor!("isnotnull", &[], Type, PureScalar, Arity::exact(1), "type.isnotnull"),
        // conditional
        descriptor!("if", &[], Conditional, PureScalar, Arity::exact(3), "cond.if"),
        descriptor!("case", &[], Conditional, PureScalar, Arity::at_least(2), "cond.case"),
        descriptor!("coalesce", &[], Conditional, PureScalar, Arity::at_least(1), "cond.coalesce"),
        descriptor!("ifnull", &[], Conditional, PureScalar, Arity::exact(2), "cond.ifnull"),
        descriptor!("nullif", &[], Conditional, PureScalar, Arity::exact(2), "cond.nullif"),
        descriptor!("validate", &[], Conditional, PureScalar, Arity::at_least(2), "cond.validate"),
        // relevance
        descriptor!("match", &[], Relevance, Relevance, Arity::exact(2), "relevance.match"),
        descriptor!("match_phrase", &[], Relevance, Relevance, Arity::exact(2), "relevance.match_phrase"),
        descriptor!("query_string", &[], Relevance, Relevance, Arity::at_least(1), "relevance.query_string"),
        // aggregation
        descriptor!("count", &["c"], Aggregation, Aggregation, Arity::range(0, 1), "agg.count"),
        descriptor!("sum", &[], Aggregation, Aggregation, Arity::exact(1), "agg.sum"),
        descriptor!("avg", &["mean"], Aggregation, Aggregation, Arity::exact(1), "agg.avg"),
        descriptor!("min", &[], Aggregation, Aggregation, Arity::exact(1), "agg.min"),
        descriptor!("max", &[], Aggregation, Aggregation, Arity::exact(1), "agg.max"),
        descriptor!("dc", &["distinct_count"], Aggregation, Aggregation, Arity::exact(1), "agg.dc"),
        descriptor!("values", &[], Aggregation, Aggregation, Arity::exact(1), "agg.values"),
        descriptor!("earliest", &[], Aggregation, Aggregation, Arity::exact(1), "agg.earliest"),
        descriptor!("latest", &[], Aggregation, Aggregation, Arity::exact(1), "agg.latest"),
        descriptor!("stdev", &["stddev"], Aggregation, Aggregation, Arity::exact(1), "agg.stdev"),
        descriptor!("var", &["variance"], Aggregation, Aggregation, Arity::exact(1), "agg.var"),
        descriptor!("percentile", &["perc"], Aggregation, Aggregation, Arity::exact(2), "agg.percentile"),
        // crypto
        descriptor!("sha1", &[], Crypto, PureScalar, Arity::exact(1), "crypto.sha1"),
        descriptor!("sha256", &[], Crypto, PureScalar, Arity::exact(1), "crypto.sha256"),
        // ip
        descriptor!("cidrmatch", &[], Ip, PureScalar, Arity::exact(2), "ip.cidrmatch"),
        descriptor!("is_ipv4", &[], Ip, PureScalar, Arity::exact(1), "ip.is_ipv4"),
        descriptor!("is_ipv6", &[], Ip, PureScalar, Arity::exact(1), "ip.is_ipv6"),
        // json
        descriptor!("json_extract", &[], Json, PureScalar, Arity::exact(2), "json.extract"),
        descriptor!("json_valid", &[], Json, PureScalar, Arity::exact(1), "json.valid"),
        descriptor!("json_array_length", &[], Json, PureScalar, Arity::exact(1), "json.array_length"),
        // system
        descriptor!("now", &[], System, NonDeterministic, Arity::exact(0), "system.now"),
        descriptor!("rand", &[], System, NonDeterministic, Arity::range(0, 1), "system.rand"),
    ]
}
