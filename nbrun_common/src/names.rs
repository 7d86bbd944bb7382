//! Expanding and abbreviating ECR image and IAM role names.
//!
//! Users refer to images and roles by their short names (`notebook-runner`,
//! `BasicExecuteNotebookRole-us-west-2`); the services want full URIs and
//! ARNs. Listings apply the inverse so output stays readable.

use lazy_static::lazy_static;
use regex::Regex;

/// Expand a bare image name into a full ECR image URI in the caller's
/// account. Names already containing a registry (a `/`) are returned
/// unchanged apart from a default `:latest` tag.
pub fn expand_image(image: &str, account: &str, region: &str) -> String {
    let mut image = if image.contains('/') {
        image.to_owned()
    } else {
        format!("{}.dkr.ecr.{}.amazonaws.com/{}", account, region, image)
    };
    if !image.rsplit('/').next().unwrap_or("").contains(':') {
        image.push_str(":latest");
    }
    image
}

/// Expand a bare role name into a full IAM role ARN in the caller's account.
pub fn expand_role(role: &str, account: &str) -> String {
    if role.contains('/') {
        role.to_owned()
    } else {
        format!("arn:aws:iam::{}:role/{}", account, role)
    }
}

lazy_static! {
    static ref ECR_IMAGE: Regex = Regex::new(
        r"^(?P<account>\d+)\.dkr\.ecr\.(?P<region>[^.]+)\.amazonaws\.com/(?P<image>[^:/]+)(?P<tag>:[^:]+)?$"
    )
    .expect("couldn't parse built-in regex");
    static ref IAM_ROLE: Regex =
        Regex::new(r"^arn:aws:iam::(?P<account>\d+):role/(?P<name>.+)$")
            .expect("couldn't parse built-in regex");
}

/// If the image lives in an ECR registry, reduce it back to its base name
/// (dropping a `:latest` tag). Anything else is returned unchanged.
pub fn abbreviate_image(image: &str) -> String {
    match ECR_IMAGE.captures(image) {
        Some(caps) => {
            let tag = match caps.name("tag").map(|m| m.as_str()) {
                None | Some(":latest") => "",
                Some(tag) => tag,
            };
            format!("{}{}", &caps["image"], tag)
        }
        None => image.to_owned(),
    }
}

/// If the role is an IAM role ARN, reduce it back to its base name.
pub fn abbreviate_role(role: &str) -> String {
    match IAM_ROLE.captures(role) {
        Some(caps) => caps["name"].to_owned(),
        None => role.to_owned(),
    }
}
